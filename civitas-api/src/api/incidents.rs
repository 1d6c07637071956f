//! Incident endpoints
//!
//! Visibility follows the caller: administrators see every incident,
//! leaders the ones assigned to them, everyone else their own reports.
//! `GET /api/incidents/track/:radicate` is the only public view and exposes
//! triage state only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use civitas_common::models::{Incident, IncidentStatus, Priority, ReportChannel, Role};
use civitas_common::pagination::{Page, PageRequest};
use civitas_common::validation::{is_dane_code, Validate, ValidationErrors};
use civitas_common::Coordinates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::incidents::{self as incident_db, IncidentFilter, IncidentScope, StatusChange};
use crate::db::reference;
use crate::error::{ApiError, ApiResult};
use crate::services::analyzer::CategoryHint;
use crate::services::incidents::{self, Report, ReportImage};
use crate::services::storage;
use crate::AppState;

pub const MAX_DESCRIPTION_CHARS: usize = 2000;
pub const MAX_ADDRESS_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
pub struct SubmitIncidentRequest {
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub municipality_code: Option<String>,
    pub township_code: Option<String>,
    pub category_code: Option<String>,
    pub subcategory_code: Option<String>,
    /// Base64 photo, optionally as a `data:` URL
    #[serde(default)]
    pub image: String,
}

impl Validate for SubmitIncidentRequest {
    fn validate(&self) -> civitas_common::Result<()> {
        let mut errors = ValidationErrors::new();
        if let Some(description) = &self.description {
            errors.max_len("description", description, MAX_DESCRIPTION_CHARS);
        }
        if let Some(address) = &self.address {
            errors.max_len("address", address, MAX_ADDRESS_CHARS);
        }
        if Coordinates::new(self.latitude, self.longitude).is_err() {
            errors.add("location", "latitude/longitude out of range");
        }
        if let Some(code) = &self.municipality_code {
            errors.dane_code("municipality_code", code, 5);
        }
        if let Some(code) = &self.township_code {
            errors.dane_code("township_code", code, 8);
        }
        errors.require("image", &self.image);
        errors.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IncidentListQuery {
    pub status: Option<IncidentStatus>,
    pub priority: Option<Priority>,
    pub municipality_code: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReassignRequest {
    /// Target leader; omitted means re-run nearest-leader routing
    pub leader_id: Option<Uuid>,
}

/// Public tracking view of an incident
#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub radicate_number: String,
    pub status: IncidentStatus,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: i64,
    pub by_status: BTreeMap<&'static str, i64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /api/incidents
pub async fn submit_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SubmitIncidentRequest>,
) -> ApiResult<(StatusCode, Json<Incident>)> {
    request.validate()?;

    let image = storage::decode_base64_image(&request.image, state.config.storage.max_image_bytes)?;
    let reporter_phone = crate::db::users::get_user(&state.db, user.id)
        .await?
        .and_then(|u| u.phone);

    let submission = incidents::submit(
        &state,
        Report {
            channel: ReportChannel::Web,
            reporter_user_id: Some(user.id),
            reporter_phone,
            description: non_blank(request.description),
            location: Coordinates::new(request.latitude, request.longitude)?,
            address: non_blank(request.address),
            municipality_code: request.municipality_code,
            township_code: request.township_code,
            hint: CategoryHint {
                category_code: non_blank(request.category_code),
                subcategory_code: non_blank(request.subcategory_code),
            },
            image: ReportImage::Upload(image),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(submission.incident)))
}

/// GET /api/incidents
pub async fn list_incidents(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(page): Query<PageRequest>,
    Query(query): Query<IncidentListQuery>,
) -> ApiResult<Json<Page<Incident>>> {
    if let Some(code) = &query.municipality_code {
        if !is_dane_code(code, 5) {
            return Err(ApiError::BadRequest(format!("invalid municipality code {}", code)));
        }
    }

    let scope = incidents::scope_for(&state, &user).await?;
    let filter = IncidentFilter {
        status: query.status,
        priority: query.priority,
        municipality_code: query.municipality_code,
        category_id: query.category_id,
    };
    Ok(Json(
        incident_db::list_incidents(&state.db, scope, &filter, &page).await?,
    ))
}

/// GET /api/incidents/:id
pub async fn get_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(incidents::get_visible(&state, &user, id).await?))
}

/// GET /api/incidents/track/:radicate
pub async fn track_incident(
    State(state): State<AppState>,
    Path(radicate): Path<String>,
) -> ApiResult<Json<TrackingResponse>> {
    let incident = incident_db::get_incident_by_radicate(&state.db, &radicate)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("radicate {}", radicate)))?;

    let category = match incident.category_id {
        Some(id) => reference::category_name(&state.db, id).await?,
        None => None,
    };

    Ok(Json(TrackingResponse {
        radicate_number: incident.radicate_number,
        status: incident.status,
        priority: incident.priority,
        category,
        created_at: incident.created_at,
        decided_at: incident.decided_at,
    }))
}

/// POST /api/incidents/:id/accept
pub async fn accept_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<AcceptRequest>,
) -> ApiResult<Json<Incident>> {
    user.require_any(&[Role::Admin, Role::Leader])?;
    let incident =
        incidents::change_status(&state, &user, id, StatusChange::Accept(request.priority)).await?;
    Ok(Json(incident))
}

/// POST /api/incidents/:id/reject
pub async fn reject_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<Incident>> {
    user.require_any(&[Role::Admin, Role::Leader])?;
    let incident =
        incidents::change_status(&state, &user, id, StatusChange::Reject(request.reason)).await?;
    Ok(Json(incident))
}

/// POST /api/incidents/:id/resolve
pub async fn resolve_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    user.require_any(&[Role::Admin, Role::Leader])?;
    let incident = incidents::change_status(&state, &user, id, StatusChange::Resolve).await?;
    Ok(Json(incident))
}

/// POST /api/incidents/:id/reassign
pub async fn reassign_incident(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReassignRequest>>,
) -> ApiResult<Json<Incident>> {
    user.require_role(Role::Admin)?;
    let leader_id = request.and_then(|Json(r)| r.leader_id);
    Ok(Json(incidents::reassign(&state, id, leader_id).await?))
}

/// GET /api/incidents/stats
///
/// Counts by status within the caller's scope.
pub async fn incident_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<StatsResponse>> {
    user.require_any(&[Role::Admin, Role::Leader])?;
    let scope = match incidents::scope_for(&state, &user).await? {
        IncidentScope::Reporter(_) => {
            return Err(ApiError::Forbidden(
                "leader role without a leader profile".to_string(),
            ))
        }
        scope => scope,
    };

    let counts = incident_db::status_counts(&state.db, scope).await?;
    Ok(Json(StatsResponse {
        total: counts.iter().map(|(_, n)| n).sum(),
        by_status: counts.into_iter().map(|(s, n)| (s.as_str(), n)).collect(),
    }))
}
