//! Leader profile persistence

use civitas_common::models::{parse_uuid, Leader, Role};
use civitas_common::pagination::{calculate_pagination, Page, PageRequest};
use civitas_common::time::now;
use civitas_common::{Coordinates, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::{reference, users};

const LEADER_SELECT: &str = r#"
    SELECT l.id, l.user_id, u.full_name, l.department_code, l.municipality_code,
           l.latitude, l.longitude, l.is_active, l.created_at
    FROM leaders l
    JOIN users u ON u.id = l.user_id
"#;

#[derive(Debug, Clone)]
pub struct NewLeader {
    pub user_id: Uuid,
    pub department_code: String,
    pub municipality_code: String,
    pub location: Coordinates,
}

/// Partial leader update; moving requires both codes to stay consistent
#[derive(Debug, Clone, Default)]
pub struct LeaderUpdate {
    pub department_code: Option<String>,
    pub municipality_code: Option<String>,
    pub location: Option<Coordinates>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LeaderFilter {
    pub department_code: Option<String>,
    pub municipality_code: Option<String>,
}

fn row_to_leader(row: &SqliteRow) -> Result<Leader> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    Ok(Leader {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        full_name: row.try_get("full_name")?,
        department_code: row.try_get("department_code")?,
        municipality_code: row.try_get("municipality_code")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Municipality must exist and sit inside the department
async fn check_jurisdiction(
    pool: &SqlitePool,
    department_code: &str,
    municipality_code: &str,
) -> Result<()> {
    let municipality = reference::get_municipality(pool, municipality_code)
        .await?
        .ok_or_else(|| {
            Error::InvalidInput(format!("unknown municipality {}", municipality_code))
        })?;
    if municipality.department_code != department_code {
        return Err(Error::InvalidInput(format!(
            "municipality {} does not belong to department {}",
            municipality_code, department_code
        )));
    }
    Ok(())
}

/// Create a leader profile and grant the user the leader role
pub async fn create_leader(pool: &SqlitePool, new_leader: &NewLeader) -> Result<Leader> {
    if users::get_user(pool, new_leader.user_id).await?.is_none() {
        return Err(Error::NotFound(format!("user {}", new_leader.user_id)));
    }
    check_jurisdiction(pool, &new_leader.department_code, &new_leader.municipality_code).await?;

    let id = Uuid::new_v4();
    let timestamp = now();

    sqlx::query(
        r#"
        INSERT INTO leaders (
            id, user_id, department_code, municipality_code, latitude, longitude,
            is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new_leader.user_id.to_string())
    .bind(&new_leader.department_code)
    .bind(&new_leader.municipality_code)
    .bind(new_leader.location.latitude)
    .bind(new_leader.location.longitude)
    .bind(timestamp)
    .bind(timestamp)
    .execute(pool)
    .await
    .map_err(|e| {
        let err = Error::from(e);
        if err.is_unique_violation() {
            Error::Conflict(format!("user {} already has a leader profile", new_leader.user_id))
        } else {
            err
        }
    })?;

    users::add_role(pool, new_leader.user_id, Role::Leader).await?;

    get_leader(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("leader vanished after insert".to_string()))
}

pub async fn get_leader(pool: &SqlitePool, id: Uuid) -> Result<Option<Leader>> {
    let sql = format!("{} WHERE l.id = ?", LEADER_SELECT);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_leader).transpose()
}

pub async fn find_leader_by_user(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Leader>> {
    let sql = format!("{} WHERE l.user_id = ?", LEADER_SELECT);
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_leader).transpose()
}

fn push_leader_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &LeaderFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(code) = &filter.department_code {
        builder.push(" AND l.department_code = ").push_bind(code.clone());
    }
    if let Some(code) = &filter.municipality_code {
        builder.push(" AND l.municipality_code = ").push_bind(code.clone());
    }
}

pub async fn list_leaders(
    pool: &SqlitePool,
    filter: &LeaderFilter,
    request: &PageRequest,
) -> Result<Page<Leader>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM leaders l");
    push_leader_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;
    let pagination = calculate_pagination(total, request);

    let mut select = QueryBuilder::<Sqlite>::new(LEADER_SELECT);
    push_leader_filter(&mut select, filter);
    select
        .push(" ORDER BY l.created_at, l.rowid LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let items = rows.iter().map(row_to_leader).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, pagination))
}

/// A leader can take incidents only while the profile and the account are
/// active and the account still holds the leader role
const ROUTABLE: &str = r#"
    l.is_active = 1 AND u.is_active = 1
    AND EXISTS (SELECT 1 FROM user_roles r WHERE r.user_id = l.user_id AND r.role = 'leader')
"#;

/// Leaders that can receive incidents, oldest first
pub async fn active_leaders(pool: &SqlitePool) -> Result<Vec<Leader>> {
    let sql = format!(
        "{} WHERE {} ORDER BY l.created_at, l.rowid",
        LEADER_SELECT, ROUTABLE
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_leader).collect()
}

pub async fn is_routable(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM leaders l JOIN users u ON u.id = l.user_id WHERE l.id = ? AND {})",
        ROUTABLE
    );
    let routable = sqlx::query_scalar(&sql)
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(routable)
}

pub async fn update_leader(pool: &SqlitePool, id: Uuid, update: &LeaderUpdate) -> Result<Leader> {
    let current = get_leader(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("leader {}", id)))?;

    let department_code = update
        .department_code
        .clone()
        .unwrap_or(current.department_code);
    let municipality_code = update
        .municipality_code
        .clone()
        .unwrap_or(current.municipality_code);
    check_jurisdiction(pool, &department_code, &municipality_code).await?;

    let (latitude, longitude) = match update.location {
        Some(location) => (location.latitude, location.longitude),
        None => (current.latitude, current.longitude),
    };

    sqlx::query(
        r#"
        UPDATE leaders
        SET department_code = ?, municipality_code = ?, latitude = ?, longitude = ?,
            is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&department_code)
    .bind(&municipality_code)
    .bind(latitude)
    .bind(longitude)
    .bind(update.is_active.unwrap_or(current.is_active))
    .bind(now())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    get_leader(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("leader {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::{create_user, NewUser};
    use civitas_common::db::init_memory_database;

    async fn user(pool: &SqlitePool, email: &str) -> Uuid {
        create_user(
            pool,
            &NewUser {
                email: email.to_string(),
                full_name: "Líder Comunal".to_string(),
                phone: None,
                password: "password123".to_string(),
                organization_id: None,
                roles: vec![Role::Citizen],
            },
        )
        .await
        .unwrap()
        .id
    }

    fn medellin(user_id: Uuid) -> NewLeader {
        NewLeader {
            user_id,
            department_code: "05".to_string(),
            municipality_code: "05001".to_string(),
            location: Coordinates::new(6.2442, -75.5812).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_leader_grants_role() {
        let pool = init_memory_database().await.unwrap();
        let user_id = user(&pool, "l1@example.co").await;

        let leader = create_leader(&pool, &medellin(user_id)).await.unwrap();
        assert_eq!(leader.full_name, "Líder Comunal");
        assert!(leader.is_active);

        let user = users::get_user(&pool, user_id).await.unwrap().unwrap();
        assert!(user.has_role(Role::Leader));
        assert!(user.has_role(Role::Citizen));
    }

    #[tokio::test]
    async fn test_one_profile_per_user() {
        let pool = init_memory_database().await.unwrap();
        let user_id = user(&pool, "l2@example.co").await;
        create_leader(&pool, &medellin(user_id)).await.unwrap();
        let err = create_leader(&pool, &medellin(user_id)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_municipality_must_match_department() {
        let pool = init_memory_database().await.unwrap();
        let user_id = user(&pool, "l3@example.co").await;
        let mut leader = medellin(user_id);
        leader.department_code = "76".to_string();
        let err = create_leader(&pool, &leader).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_deactivated_leader_not_active() {
        let pool = init_memory_database().await.unwrap();
        let user_id = user(&pool, "l4@example.co").await;
        let leader = create_leader(&pool, &medellin(user_id)).await.unwrap();
        assert_eq!(active_leaders(&pool).await.unwrap().len(), 1);

        let updated = update_leader(
            &pool,
            leader.id,
            &LeaderUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!updated.is_active);
        assert!(active_leaders(&pool).await.unwrap().is_empty());
        assert!(!is_routable(&pool, leader.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_leader_without_role_not_routable() {
        let pool = init_memory_database().await.unwrap();
        let user_id = user(&pool, "l5@example.co").await;
        let leader = create_leader(&pool, &medellin(user_id)).await.unwrap();
        assert!(is_routable(&pool, leader.id).await.unwrap());

        users::set_roles(&pool, user_id, &[Role::Citizen]).await.unwrap();
        assert!(active_leaders(&pool).await.unwrap().is_empty());
        assert!(!is_routable(&pool, leader.id).await.unwrap());

        users::set_roles(&pool, user_id, &[Role::Leader, Role::Citizen])
            .await
            .unwrap();
        assert_eq!(active_leaders(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_municipality() {
        let pool = init_memory_database().await.unwrap();
        let a = user(&pool, "a@example.co").await;
        let b = user(&pool, "b@example.co").await;
        create_leader(&pool, &medellin(a)).await.unwrap();
        create_leader(
            &pool,
            &NewLeader {
                user_id: b,
                department_code: "76".to_string(),
                municipality_code: "76001".to_string(),
                location: Coordinates::new(3.4516, -76.5320).unwrap(),
            },
        )
        .await
        .unwrap();

        let page = list_leaders(
            &pool,
            &LeaderFilter {
                municipality_code: Some("76001".to_string()),
                ..Default::default()
            },
            &PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].user_id, b);
    }
}
