//! Domain models
//!
//! Enums are persisted as snake_case TEXT and round-trip through
//! `as_str` / `FromStr`. Identifiers are UUIDv4 stored as hyphenated TEXT.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Role granted to a user; a user may hold several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Leader,
    Citizen,
}

text_enum!(Role {
    Admin => "admin",
    Leader => "leader",
    Citizen => "citizen",
});

/// Incident triage status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Submitted and waiting for a leader decision
    Pending,
    Accepted,
    Rejected,
    Resolved,
}

text_enum!(IncidentStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Resolved => "resolved",
});

impl IncidentStatus {
    /// Allowed lifecycle moves: pending → accepted | rejected, accepted → resolved
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (IncidentStatus::Pending, IncidentStatus::Accepted)
                | (IncidentStatus::Pending, IncidentStatus::Rejected)
                | (IncidentStatus::Accepted, IncidentStatus::Resolved)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Rejected | IncidentStatus::Resolved)
    }
}

/// Priority assigned by the leader on acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

text_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// Channel through which an incident was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportChannel {
    Web,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

text_enum!(ReportChannel {
    Web => "web",
    WhatsApp => "whatsapp",
});

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Colombian tax id (NIT), optional
    pub nit: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User account. Credentials never leave the database layer.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub organization_id: Option<Uuid>,
    pub is_active: bool,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Department {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Municipality {
    pub code: String,
    pub department_code: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Township {
    pub code: String,
    pub municipality_code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subcategory {
    pub id: i64,
    pub category_id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub subcategories: Vec<Subcategory>,
}

/// Leader profile: a user responsible for a municipality, located at a point
#[derive(Debug, Clone, Serialize)]
pub struct Leader {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub department_code: String,
    pub municipality_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub radicate_number: String,
    pub channel: ReportChannel,
    pub reporter_user_id: Option<Uuid>,
    pub reporter_phone: Option<String>,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub municipality_code: Option<String>,
    pub township_code: Option<String>,
    pub image_key: String,
    pub image_url: String,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub ai_summary: Option<String>,
    pub ai_confidence: Option<f64>,
    pub status: IncidentStatus,
    pub priority: Option<Priority>,
    pub leader_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Parse a stored UUID column
pub fn parse_uuid(value: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("corrupt uuid '{}' in database: {}", value, e)))
}
