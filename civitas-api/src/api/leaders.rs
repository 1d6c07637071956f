//! Administrator leader management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use civitas_common::models::{Leader, Role};
use civitas_common::pagination::{Page, PageRequest};
use civitas_common::validation::{is_dane_code, Validate, ValidationErrors};
use civitas_common::Coordinates;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::leaders::{self, LeaderFilter, LeaderUpdate, NewLeader};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateLeaderRequest {
    pub user_id: Uuid,
    pub department_code: String,
    pub municipality_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Validate for CreateLeaderRequest {
    fn validate(&self) -> civitas_common::Result<()> {
        let mut errors = ValidationErrors::new();
        errors.dane_code("department_code", &self.department_code, 2);
        errors.dane_code("municipality_code", &self.municipality_code, 5);
        if Coordinates::new(self.latitude, self.longitude).is_err() {
            errors.add("location", "latitude/longitude out of range");
        }
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateLeaderRequest {
    pub department_code: Option<String>,
    pub municipality_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: Option<bool>,
}

impl UpdateLeaderRequest {
    fn into_update(self) -> ApiResult<LeaderUpdate> {
        let mut errors = ValidationErrors::new();
        if let Some(code) = &self.department_code {
            errors.dane_code("department_code", code, 2);
        }
        if let Some(code) = &self.municipality_code {
            errors.dane_code("municipality_code", code, 5);
        }
        let location = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => match Coordinates::new(lat, lon) {
                Ok(point) => Some(point),
                Err(_) => {
                    errors.add("location", "latitude/longitude out of range");
                    None
                }
            },
            (None, None) => None,
            _ => {
                errors.add("location", "latitude and longitude must be given together");
                None
            }
        };
        errors.into_result()?;

        Ok(LeaderUpdate {
            department_code: self.department_code,
            municipality_code: self.municipality_code,
            location,
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaderListQuery {
    pub department_code: Option<String>,
    pub municipality_code: Option<String>,
}

/// POST /api/leaders
///
/// The user gains the leader role.
pub async fn create_leader(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(request): Json<CreateLeaderRequest>,
) -> ApiResult<(StatusCode, Json<Leader>)> {
    admin.require_role(Role::Admin)?;
    request.validate()?;

    let leader = leaders::create_leader(
        &state.db,
        &NewLeader {
            user_id: request.user_id,
            department_code: request.department_code,
            municipality_code: request.municipality_code,
            location: Coordinates::new(request.latitude, request.longitude)?,
        },
    )
    .await?;

    info!(
        leader_id = %leader.id,
        user_id = %leader.user_id,
        municipality = %leader.municipality_code,
        "Leader created"
    );
    Ok((StatusCode::CREATED, Json(leader)))
}

/// GET /api/leaders
pub async fn list_leaders(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Query(page): Query<PageRequest>,
    Query(query): Query<LeaderListQuery>,
) -> ApiResult<Json<Page<Leader>>> {
    admin.require_role(Role::Admin)?;
    if let Some(code) = &query.department_code {
        if !is_dane_code(code, 2) {
            return Err(ApiError::BadRequest(format!("invalid department code {}", code)));
        }
    }
    let filter = LeaderFilter {
        department_code: query.department_code,
        municipality_code: query.municipality_code,
    };
    Ok(Json(leaders::list_leaders(&state.db, &filter, &page).await?))
}

/// GET /api/leaders/:id
pub async fn get_leader(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Leader>> {
    admin.require_role(Role::Admin)?;
    leaders::get_leader(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("leader {}", id)))
}

/// PUT /api/leaders/:id
pub async fn update_leader(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLeaderRequest>,
) -> ApiResult<Json<Leader>> {
    admin.require_role(Role::Admin)?;
    let update = request.into_update()?;
    let leader = leaders::update_leader(&state.db, id, &update).await?;
    info!(leader_id = %leader.id, active = leader.is_active, "Leader updated");
    Ok(Json(leader))
}
