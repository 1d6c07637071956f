//! Incident event bus
//!
//! Workflow code emits `IncidentEvent`s on a tokio broadcast channel; the SSE
//! endpoint forwards them to connected dashboards. Emission never blocks and
//! never fails the request that triggered it.

use chrono::{DateTime, Utc};
use civitas_common::models::{IncidentStatus, Priority, ReportChannel};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Incident lifecycle events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum IncidentEvent {
    /// A new incident was stored
    IncidentSubmitted {
        incident_id: Uuid,
        radicate_number: String,
        channel: ReportChannel,
        municipality_code: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Incident routed (or re-routed) to a leader
    IncidentAssigned {
        incident_id: Uuid,
        leader_id: Uuid,
        distance_km: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Leader accepted or rejected the incident
    IncidentDecided {
        incident_id: Uuid,
        status: IncidentStatus,
        priority: Option<Priority>,
        timestamp: DateTime<Utc>,
    },

    IncidentResolved {
        incident_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl IncidentEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            IncidentEvent::IncidentSubmitted { .. } => "IncidentSubmitted",
            IncidentEvent::IncidentAssigned { .. } => "IncidentAssigned",
            IncidentEvent::IncidentDecided { .. } => "IncidentDecided",
            IncidentEvent::IncidentResolved { .. } => "IncidentResolved",
        }
    }

    pub fn incident_id(&self) -> Uuid {
        match self {
            IncidentEvent::IncidentSubmitted { incident_id, .. }
            | IncidentEvent::IncidentAssigned { incident_id, .. }
            | IncidentEvent::IncidentDecided { incident_id, .. }
            | IncidentEvent::IncidentResolved { incident_id, .. } => *incident_id,
        }
    }
}

/// Broadcast bus for incident events
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<IncidentEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IncidentEvent,
    ) -> Result<usize, broadcast::error::SendError<IncidentEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: IncidentEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            debug!("No SSE subscribers for {}", event_type);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
