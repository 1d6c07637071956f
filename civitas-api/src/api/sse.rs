//! Server-Sent Events stream of incident events

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::auth::AuthUser;
use crate::db::incidents::{self as incident_db, IncidentScope};
use crate::error::ApiResult;
use crate::events::IncidentEvent;
use crate::services::incidents;
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// GET /api/events
///
/// Streams `IncidentSubmitted`, `IncidentAssigned`, `IncidentDecided` and
/// `IncidentResolved`, each as an SSE event named after its type. A
/// subscriber only receives events for incidents it could fetch through
/// `GET /api/incidents/:id`.
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let scope = incidents::scope_for(&state, &user).await?;
    info!(user_id = %user.id, ?scope, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if !visible_to(&state, scope, &event).await {
                                continue;
                            }
                            let event_type = event.event_type();
                            match serde_json::to_string(&event) {
                                Ok(event_json) => {
                                    debug!("SSE: Broadcasting {}", event_type);
                                    yield Ok(Event::default().event(event_type).data(event_json));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE: Client lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("SSE: Event bus closed, ending stream");
                            break;
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    ))
}

/// Whether a subscriber with `scope` may see the incident behind `event`
async fn visible_to(state: &AppState, scope: IncidentScope, event: &IncidentEvent) -> bool {
    if scope == IncidentScope::All {
        return true;
    }
    match incident_db::get_incident(&state.db, event.incident_id()).await {
        Ok(Some(incident)) => incidents::is_visible(&incident, scope),
        Ok(None) => false,
        Err(e) => {
            warn!("SSE: Visibility lookup failed for {}: {}", event.incident_id(), e);
            false
        }
    }
}
