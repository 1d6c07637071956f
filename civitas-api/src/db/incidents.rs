//! Incident persistence: radicate allocation, inserts, scoped queries and
//! guarded status changes

use civitas_common::models::{
    parse_uuid, Incident, IncidentStatus, Priority, ReportChannel,
};
use civitas_common::pagination::{calculate_pagination, Page, PageRequest};
use civitas_common::time::now;
use civitas_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const INCIDENT_COLUMNS: &str = r#"
    id, radicate_number, channel, reporter_user_id, reporter_phone, description,
    latitude, longitude, address, municipality_code, township_code, image_key, image_url,
    category_id, subcategory_id, ai_summary, ai_confidence, status, priority,
    leader_id, rejection_reason, created_at, updated_at, decided_at
"#;

/// Everything needed to store a new incident (always inserted as pending)
#[derive(Debug, Clone)]
pub struct NewIncident {
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
    pub leader_id: Option<Uuid>,
}

/// Which incidents a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentScope {
    All,
    /// Incidents assigned to this leader profile
    Leader(Uuid),
    /// Incidents reported by this user
    Reporter(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub priority: Option<Priority>,
    pub municipality_code: Option<String>,
    pub category_id: Option<i64>,
}

/// A guarded lifecycle move
#[derive(Debug, Clone)]
pub enum StatusChange {
    Accept(Priority),
    Reject(String),
    Resolve,
}

impl StatusChange {
    pub fn target(&self) -> IncidentStatus {
        match self {
            StatusChange::Accept(_) => IncidentStatus::Accepted,
            StatusChange::Reject(_) => IncidentStatus::Rejected,
            StatusChange::Resolve => IncidentStatus::Resolved,
        }
    }
}

/// Format a radicate number: `INC-<year>-<6-digit sequence>`
pub fn format_radicate(year: i32, sequence: i64) -> String {
    format!("INC-{}-{:06}", year, sequence)
}

/// Allocate the next radicate number for `year`
///
/// A single UPSERT ... RETURNING statement, so concurrent submitters never
/// receive the same sequence value.
pub async fn allocate_radicate(conn: &mut SqliteConnection, year: i32) -> Result<String> {
    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO radicate_counters (year, last_value) VALUES (?, 1)
        ON CONFLICT(year) DO UPDATE SET last_value = last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    Ok(format_radicate(year, sequence))
}

fn row_to_incident(row: &SqliteRow) -> Result<Incident> {
    let id: String = row.try_get("id")?;
    let reporter: Option<String> = row.try_get("reporter_user_id")?;
    let leader: Option<String> = row.try_get("leader_id")?;
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let priority: Option<String> = row.try_get("priority")?;

    Ok(Incident {
        id: parse_uuid(&id)?,
        radicate_number: row.try_get("radicate_number")?,
        channel: channel.parse()?,
        reporter_user_id: reporter.as_deref().map(parse_uuid).transpose()?,
        reporter_phone: row.try_get("reporter_phone")?,
        description: row.try_get("description")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        address: row.try_get("address")?,
        municipality_code: row.try_get("municipality_code")?,
        township_code: row.try_get("township_code")?,
        image_key: row.try_get("image_key")?,
        image_url: row.try_get("image_url")?,
        category_id: row.try_get("category_id")?,
        subcategory_id: row.try_get("subcategory_id")?,
        ai_summary: row.try_get("ai_summary")?,
        ai_confidence: row.try_get("ai_confidence")?,
        status: status.parse()?,
        priority: priority.as_deref().map(str::parse).transpose()?,
        leader_id: leader.as_deref().map(parse_uuid).transpose()?,
        rejection_reason: row.try_get("rejection_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        decided_at: row.try_get("decided_at")?,
    })
}

/// Number and store a new incident
///
/// The radicate sequence is only consumed when the insert commits.
pub async fn insert_incident(
    pool: &SqlitePool,
    year: i32,
    incident: &NewIncident,
) -> Result<Incident> {
    let id = Uuid::new_v4();
    let timestamp = now();

    let mut tx = pool.begin().await?;
    let radicate_number = allocate_radicate(&mut *tx, year).await?;

    sqlx::query(
        r#"
        INSERT INTO incidents (
            id, radicate_number, channel, reporter_user_id, reporter_phone, description,
            latitude, longitude, address, municipality_code, township_code, image_key,
            image_url, category_id, subcategory_id, ai_summary, ai_confidence, status,
            leader_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&radicate_number)
    .bind(incident.channel.as_str())
    .bind(incident.reporter_user_id.map(|u| u.to_string()))
    .bind(&incident.reporter_phone)
    .bind(&incident.description)
    .bind(incident.latitude)
    .bind(incident.longitude)
    .bind(&incident.address)
    .bind(&incident.municipality_code)
    .bind(&incident.township_code)
    .bind(&incident.image_key)
    .bind(&incident.image_url)
    .bind(incident.category_id)
    .bind(incident.subcategory_id)
    .bind(&incident.ai_summary)
    .bind(incident.ai_confidence)
    .bind(incident.leader_id.map(|l| l.to_string()))
    .bind(timestamp)
    .bind(timestamp)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_incident(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("incident vanished after insert".to_string()))
}

pub async fn get_incident(pool: &SqlitePool, id: Uuid) -> Result<Option<Incident>> {
    let sql = format!("SELECT {} FROM incidents WHERE id = ?", INCIDENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_incident).transpose()
}

pub async fn get_incident_by_radicate(
    pool: &SqlitePool,
    radicate_number: &str,
) -> Result<Option<Incident>> {
    let sql = format!(
        "SELECT {} FROM incidents WHERE radicate_number = ?",
        INCIDENT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(radicate_number.trim().to_ascii_uppercase())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_incident).transpose()
}

fn push_scope(builder: &mut QueryBuilder<'_, Sqlite>, scope: IncidentScope) {
    builder.push(" WHERE 1 = 1");
    match scope {
        IncidentScope::All => {}
        IncidentScope::Leader(leader_id) => {
            builder.push(" AND leader_id = ").push_bind(leader_id.to_string());
        }
        IncidentScope::Reporter(user_id) => {
            builder
                .push(" AND reporter_user_id = ")
                .push_bind(user_id.to_string());
        }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &IncidentFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(code) = &filter.municipality_code {
        builder.push(" AND municipality_code = ").push_bind(code.clone());
    }
    if let Some(category_id) = filter.category_id {
        builder.push(" AND category_id = ").push_bind(category_id);
    }
}

/// Newest-first page of incidents visible in `scope`
pub async fn list_incidents(
    pool: &SqlitePool,
    scope: IncidentScope,
    filter: &IncidentFilter,
    request: &PageRequest,
) -> Result<Page<Incident>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM incidents");
    push_scope(&mut count, scope);
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;
    let pagination = calculate_pagination(total, request);

    let mut select =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM incidents", INCIDENT_COLUMNS));
    push_scope(&mut select, scope);
    push_filter(&mut select, filter);
    select
        .push(" ORDER BY created_at DESC, radicate_number DESC LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows.iter().map(row_to_incident).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, pagination))
}

/// Apply a lifecycle move
///
/// The UPDATE is conditioned on the status read beforehand, so two leaders
/// deciding the same incident at once cannot both succeed.
pub async fn change_status(
    pool: &SqlitePool,
    id: Uuid,
    change: &StatusChange,
) -> Result<Incident> {
    let current = get_incident(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))?;

    let target = change.target();
    if !current.status.can_transition_to(target) {
        return Err(Error::Conflict(format!(
            "incident {} cannot move from {} to {}",
            current.radicate_number, current.status, target
        )));
    }

    let timestamp = now();
    let (priority, reason, decided_at) = match change {
        StatusChange::Accept(priority) => (Some(priority.as_str()), None, Some(timestamp)),
        StatusChange::Reject(reason) => (None, Some(reason.as_str()), Some(timestamp)),
        StatusChange::Resolve => (None, None, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE incidents
        SET status = ?,
            priority = COALESCE(?, priority),
            rejection_reason = COALESCE(?, rejection_reason),
            decided_at = COALESCE(?, decided_at),
            updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(target.as_str())
    .bind(priority)
    .bind(reason)
    .bind(decided_at)
    .bind(timestamp)
    .bind(id.to_string())
    .bind(current.status.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "incident {} changed concurrently",
            current.radicate_number
        )));
    }

    get_incident(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))
}

/// Point an incident at a leader (or clear the assignment)
pub async fn assign_leader(
    pool: &SqlitePool,
    id: Uuid,
    leader_id: Option<Uuid>,
) -> Result<Incident> {
    let result = sqlx::query("UPDATE incidents SET leader_id = ?, updated_at = ? WHERE id = ?")
        .bind(leader_id.map(|l| l.to_string()))
        .bind(now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("incident {}", id)));
    }

    get_incident(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("incident {}", id)))
}

/// Incident counts per status within a scope; every status is present
pub async fn status_counts(
    pool: &SqlitePool,
    scope: IncidentScope,
) -> Result<Vec<(IncidentStatus, i64)>> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT status, COUNT(*) FROM incidents");
    push_scope(&mut builder, scope);
    builder.push(" GROUP BY status");

    let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(pool).await?;

    let mut counts: Vec<(IncidentStatus, i64)> =
        IncidentStatus::all().iter().map(|s| (*s, 0)).collect();
    for (status, count) in rows {
        let status: IncidentStatus = status.parse()?;
        if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == status) {
            entry.1 = count;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use civitas_common::db::init_memory_database;

    fn new_incident() -> NewIncident {
        NewIncident {
            channel: ReportChannel::Web,
            reporter_user_id: None,
            reporter_phone: None,
            description: Some("Hueco en la vía".to_string()),
            latitude: 6.25,
            longitude: -75.57,
            address: None,
            municipality_code: Some("05001".to_string()),
            township_code: None,
            image_key: "incidents/2025/01/x.jpg".to_string(),
            image_url: "/media/incidents/2025/01/x.jpg".to_string(),
            category_id: None,
            subcategory_id: None,
            ai_summary: None,
            ai_confidence: None,
            leader_id: None,
        }
    }

    #[test]
    fn test_radicate_format() {
        assert_eq!(format_radicate(2025, 7), "INC-2025-000007");
        assert_eq!(format_radicate(2025, 1_234_567), "INC-2025-1234567");
    }

    #[tokio::test]
    async fn test_radicate_sequence_per_year() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(allocate_radicate(&mut conn, 2025).await.unwrap(), "INC-2025-000001");
        assert_eq!(allocate_radicate(&mut conn, 2025).await.unwrap(), "INC-2025-000002");
        assert_eq!(allocate_radicate(&mut conn, 2026).await.unwrap(), "INC-2026-000001");
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_sequence() {
        let pool = init_memory_database().await.unwrap();

        let mut orphan = new_incident();
        orphan.leader_id = Some(Uuid::new_v4());
        assert!(insert_incident(&pool, 2025, &orphan).await.is_err());

        let incident = insert_incident(&pool, 2025, &new_incident()).await.unwrap();
        assert_eq!(incident.radicate_number, "INC-2025-000001");
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let pool = init_memory_database().await.unwrap();
        let incident = insert_incident(&pool, 2025, &new_incident()).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Pending);
        assert!(incident.decided_at.is_none());

        let by_radicate = get_incident_by_radicate(&pool, "inc-2025-000001").await.unwrap().unwrap();
        assert_eq!(by_radicate.id, incident.id);
    }

    #[tokio::test]
    async fn test_status_changes_are_guarded() {
        let pool = init_memory_database().await.unwrap();
        let incident = insert_incident(&pool, 2025, &new_incident()).await.unwrap();

        let err = change_status(&pool, incident.id, &StatusChange::Resolve).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let accepted = change_status(&pool, incident.id, &StatusChange::Accept(Priority::High))
            .await
            .unwrap();
        assert_eq!(accepted.status, IncidentStatus::Accepted);
        assert_eq!(accepted.priority, Some(Priority::High));
        assert!(accepted.decided_at.is_some());

        let err = change_status(&pool, incident.id, &StatusChange::Reject("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let resolved = change_status(&pool, incident.id, &StatusChange::Resolve).await.unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.decided_at, accepted.decided_at);
    }

    #[tokio::test]
    async fn test_scoped_listing_and_counts() {
        let pool = init_memory_database().await.unwrap();
        let first = insert_incident(&pool, 2025, &new_incident()).await.unwrap();
        insert_incident(&pool, 2025, &new_incident()).await.unwrap();
        change_status(&pool, first.id, &StatusChange::Reject("duplicado".into()))
            .await
            .unwrap();

        let all = list_incidents(
            &pool,
            IncidentScope::All,
            &IncidentFilter::default(),
            &PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(all.total_items, 2);

        let pending = list_incidents(
            &pool,
            IncidentScope::All,
            &IncidentFilter {
                status: Some(IncidentStatus::Pending),
                ..Default::default()
            },
            &PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(pending.total_items, 1);

        let none = list_incidents(
            &pool,
            IncidentScope::Reporter(Uuid::new_v4()),
            &IncidentFilter::default(),
            &PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(none.total_items, 0);

        let counts = status_counts(&pool, IncidentScope::All).await.unwrap();
        assert!(counts.contains(&(IncidentStatus::Pending, 1)));
        assert!(counts.contains(&(IncidentStatus::Rejected, 1)));
        assert!(counts.contains(&(IncidentStatus::Resolved, 0)));
    }
}
