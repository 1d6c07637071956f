//! Incident workflow
//!
//! Submission: validate → store image → analyze → resolve taxonomy ids →
//! route to nearest leader → number and insert pending → emit events.
//! Decisions and resolution go through the guarded status change in
//! `db::incidents` and notify WhatsApp reporters.

use chrono::{DateTime, Utc};
use civitas_common::models::{Incident, IncidentStatus, ReportChannel, Role};
use civitas_common::time::{now, year_of};
use civitas_common::{Coordinates, Error, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::incidents::{self, IncidentScope, NewIncident, StatusChange};
use crate::db::{leaders, reference};
use crate::events::IncidentEvent;
use crate::services::analyzer::CategoryHint;
use crate::services::routing;
use crate::services::storage::{self, DecodedImage, StoredObject};
use crate::AppState;

/// Photo attached to a report
#[derive(Debug, Clone)]
pub enum ReportImage {
    /// Uploaded with the request, not stored yet
    Upload(DecodedImage),
    /// Already in the object store (WhatsApp drafts)
    Stored(StoredObject),
}

/// A validated report ready to submit
#[derive(Debug, Clone)]
pub struct Report {
    pub channel: ReportChannel,
    pub reporter_user_id: Option<Uuid>,
    pub reporter_phone: Option<String>,
    pub description: Option<String>,
    pub location: Coordinates,
    pub address: Option<String>,
    pub municipality_code: Option<String>,
    pub township_code: Option<String>,
    pub hint: CategoryHint,
    pub image: ReportImage,
}

/// Stored incident plus how it was routed
#[derive(Debug, Clone)]
pub struct Submission {
    pub incident: Incident,
    pub distance_km: Option<f64>,
}

/// Check municipality/township codes; a township alone implies its municipality
async fn resolve_geography(
    state: &AppState,
    municipality_code: Option<String>,
    township_code: Option<String>,
) -> Result<(Option<String>, Option<String>)> {
    let township = match township_code.as_deref() {
        Some(code) => Some(
            reference::get_township(&state.db, code)
                .await?
                .ok_or_else(|| Error::InvalidInput(format!("unknown township {}", code)))?,
        ),
        None => None,
    };

    let municipality_code = match (municipality_code, &township) {
        (Some(code), Some(t)) if t.municipality_code != code => {
            return Err(Error::InvalidInput(format!(
                "township {} does not belong to municipality {}",
                t.code, code
            )));
        }
        (Some(code), _) => {
            if reference::get_municipality(&state.db, &code).await?.is_none() {
                return Err(Error::InvalidInput(format!("unknown municipality {}", code)));
            }
            Some(code)
        }
        (None, Some(t)) => Some(t.municipality_code.clone()),
        (None, None) => None,
    };

    Ok((municipality_code, township.map(|t| t.code)))
}

/// Submit a new incident
///
/// An uploaded photo is removed from the store again when the incident
/// cannot be recorded.
pub async fn submit(state: &AppState, report: Report) -> Result<Submission> {
    let geography = resolve_geography(
        state,
        report.municipality_code.clone(),
        report.township_code.clone(),
    )
    .await?;
    let submitted_at = now();

    match &report.image {
        ReportImage::Upload(image) => {
            let stored =
                storage::store_incident_image(state.store.as_ref(), image, &submitted_at).await?;
            let recorded = record(state, &report, geography, &stored, &image.bytes, submitted_at).await;
            if recorded.is_err() {
                if let Err(e) = state.store.delete(&stored.key).await {
                    warn!(key = %stored.key, "Failed to remove orphaned upload: {}", e);
                }
            }
            recorded
        }
        ReportImage::Stored(stored) => {
            let bytes = state.store.get(&stored.key).await?;
            record(state, &report, geography, stored, &bytes, submitted_at).await
        }
    }
}

/// Analyze, number, route and store a report whose photo is already stored
async fn record(
    state: &AppState,
    report: &Report,
    (municipality_code, township_code): (Option<String>, Option<String>),
    stored: &StoredObject,
    image_bytes: &[u8],
    submitted_at: DateTime<Utc>,
) -> Result<Submission> {
    let taxonomy = reference::taxonomy_codes(&state.db).await?;
    let analysis = state
        .analyzer
        .analyze(image_bytes, &report.hint, &taxonomy)
        .await?;

    let category_id = match analysis.category_code.as_deref() {
        Some(code) => reference::find_category_id(&state.db, code).await?,
        None => None,
    };
    let subcategory_id = match analysis.subcategory_code.as_deref() {
        Some(code) => reference::find_subcategory_by_code(&state.db, code)
            .await?
            .map(|s| s.id),
        None => None,
    };

    let route = routing::route_incident(
        &state.db,
        &report.location,
        state.config.routing.max_distance_km,
    )
    .await?;

    let incident = incidents::insert_incident(
        &state.db,
        year_of(&submitted_at),
        &NewIncident {
            channel: report.channel,
            reporter_user_id: report.reporter_user_id,
            reporter_phone: report.reporter_phone.clone(),
            description: report.description.clone(),
            latitude: report.location.latitude,
            longitude: report.location.longitude,
            address: report.address.clone(),
            municipality_code,
            township_code,
            image_key: stored.key.clone(),
            image_url: stored.url.clone(),
            category_id,
            subcategory_id,
            ai_summary: Some(analysis.summary),
            ai_confidence: Some(analysis.confidence),
            leader_id: route.as_ref().map(|r| r.leader.id),
        },
    )
    .await?;

    info!(
        incident_id = %incident.id,
        radicate = %incident.radicate_number,
        channel = %incident.channel,
        routed = route.is_some(),
        "Incident submitted"
    );

    state.event_bus.emit_lossy(IncidentEvent::IncidentSubmitted {
        incident_id: incident.id,
        radicate_number: incident.radicate_number.clone(),
        channel: incident.channel,
        municipality_code: incident.municipality_code.clone(),
        timestamp: incident.created_at,
    });

    if let Some(route) = &route {
        state.event_bus.emit_lossy(IncidentEvent::IncidentAssigned {
            incident_id: incident.id,
            leader_id: route.leader.id,
            distance_km: Some(route.distance_km),
            timestamp: incident.created_at,
        });
    } else {
        warn!(radicate = %incident.radicate_number, "No leader available, incident left unassigned");
    }

    Ok(Submission {
        incident,
        distance_km: route.map(|r| r.distance_km),
    })
}

/// Visibility scope of a caller
///
/// Admins see everything, leaders their assigned incidents, everyone else
/// what they reported.
pub async fn scope_for(state: &AppState, user: &AuthUser) -> Result<IncidentScope> {
    if user.is_admin() {
        return Ok(IncidentScope::All);
    }
    if user.has_role(Role::Leader) {
        if let Some(leader) = leaders::find_leader_by_user(&state.db, user.id).await? {
            return Ok(IncidentScope::Leader(leader.id));
        }
    }
    Ok(IncidentScope::Reporter(user.id))
}

pub fn is_visible(incident: &Incident, scope: IncidentScope) -> bool {
    match scope {
        IncidentScope::All => true,
        IncidentScope::Leader(leader_id) => incident.leader_id == Some(leader_id),
        IncidentScope::Reporter(user_id) => incident.reporter_user_id == Some(user_id),
    }
}

/// Fetch an incident the caller is allowed to see (invisible → NotFound)
pub async fn get_visible(state: &AppState, user: &AuthUser, id: Uuid) -> Result<Incident> {
    let incident = incidents::get_incident(&state.db, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))?;
    let scope = scope_for(state, user).await?;
    if is_visible(&incident, scope) {
        Ok(incident)
    } else {
        Err(Error::NotFound(format!("incident {}", id)))
    }
}

/// Accept, reject or resolve an incident
///
/// Only the assigned leader or an admin may act.
pub async fn change_status(
    state: &AppState,
    actor: &AuthUser,
    id: Uuid,
    change: StatusChange,
) -> Result<Incident> {
    if let StatusChange::Reject(reason) = &change {
        if reason.trim().is_empty() {
            let mut errors = civitas_common::ValidationErrors::new();
            errors.add("reason", "is required");
            return Err(errors.into());
        }
    }

    let incident = incidents::get_incident(&state.db, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))?;

    if !actor.is_admin() {
        let leader = leaders::find_leader_by_user(&state.db, actor.id).await?;
        let assigned = match (&leader, incident.leader_id) {
            (Some(leader), Some(assigned)) => leader.id == assigned,
            _ => false,
        };
        if !assigned {
            return Err(Error::Forbidden(
                "only the assigned leader or an administrator may act on this incident"
                    .to_string(),
            ));
        }
    }

    let change = match change {
        StatusChange::Reject(reason) => StatusChange::Reject(reason.trim().to_string()),
        other => other,
    };
    let updated = incidents::change_status(&state.db, id, &change).await?;

    info!(
        incident_id = %updated.id,
        radicate = %updated.radicate_number,
        status = %updated.status,
        actor = %actor.id,
        "Incident status changed"
    );

    let timestamp = updated.updated_at;
    match updated.status {
        IncidentStatus::Resolved => state.event_bus.emit_lossy(IncidentEvent::IncidentResolved {
            incident_id: updated.id,
            timestamp,
        }),
        status => state.event_bus.emit_lossy(IncidentEvent::IncidentDecided {
            incident_id: updated.id,
            status,
            priority: updated.priority,
            timestamp,
        }),
    }

    notify_reporter(state, &updated).await;
    Ok(updated)
}

/// Move an open incident to another leader
///
/// With `leader_id` the given leader must exist and be able to take
/// incidents; without it
/// nearest-leader routing runs again (possibly leaving it unassigned).
pub async fn reassign(state: &AppState, id: Uuid, leader_id: Option<Uuid>) -> Result<Incident> {
    let incident = incidents::get_incident(&state.db, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))?;
    if incident.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "incident {} is {} and cannot be reassigned",
            incident.radicate_number, incident.status
        )));
    }

    let (target, distance_km) = match leader_id {
        Some(leader_id) => {
            let leader = leaders::get_leader(&state.db, leader_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("leader {}", leader_id)))?;
            if !leaders::is_routable(&state.db, leader.id).await? {
                return Err(Error::InvalidInput(format!(
                    "leader {} is inactive or no longer holds the leader role",
                    leader_id
                )));
            }
            let location = Coordinates {
                latitude: incident.latitude,
                longitude: incident.longitude,
            };
            let distance = location.distance_km(&Coordinates {
                latitude: leader.latitude,
                longitude: leader.longitude,
            });
            (Some(leader.id), Some(distance))
        }
        None => {
            let location = Coordinates {
                latitude: incident.latitude,
                longitude: incident.longitude,
            };
            let route =
                routing::route_incident(&state.db, &location, state.config.routing.max_distance_km)
                    .await?;
            match route {
                Some(route) => (Some(route.leader.id), Some(route.distance_km)),
                None => (None, None),
            }
        }
    };

    let updated = incidents::assign_leader(&state.db, id, target).await?;
    info!(
        incident_id = %updated.id,
        leader_id = ?target,
        "Incident reassigned"
    );

    if let Some(leader_id) = target {
        state.event_bus.emit_lossy(IncidentEvent::IncidentAssigned {
            incident_id: updated.id,
            leader_id,
            distance_km,
            timestamp: updated.updated_at,
        });
    }
    Ok(updated)
}

/// Status reply text used for WhatsApp notifications and `estado` queries
pub fn status_message(incident: &Incident) -> String {
    match incident.status {
        IncidentStatus::Pending => format!(
            "Su reporte {} está pendiente de revisión.",
            incident.radicate_number
        ),
        IncidentStatus::Accepted => format!(
            "Su reporte {} fue aceptado con prioridad {}.",
            incident.radicate_number,
            incident.priority.map(|p| p.as_str()).unwrap_or("sin asignar")
        ),
        IncidentStatus::Rejected => format!(
            "Su reporte {} fue rechazado. Motivo: {}",
            incident.radicate_number,
            incident.rejection_reason.as_deref().unwrap_or("no especificado")
        ),
        IncidentStatus::Resolved => format!(
            "Su reporte {} fue resuelto. ¡Gracias por reportar!",
            incident.radicate_number
        ),
    }
}

/// Tell a WhatsApp reporter about a status change; failures are logged only
async fn notify_reporter(state: &AppState, incident: &Incident) {
    if incident.channel != ReportChannel::WhatsApp {
        return;
    }
    let Some(phone) = incident.reporter_phone.as_deref() else {
        return;
    };

    if let Err(e) = state.gateway.send_text(phone, &status_message(incident)).await {
        warn!(
            radicate = %incident.radicate_number,
            "WhatsApp notification failed: {}", e
        );
    }
}
