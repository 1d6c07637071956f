//! User and role persistence

use civitas_common::api::{generate_salt, hash_password};
use civitas_common::models::{parse_uuid, Role, User};
use civitas_common::pagination::{calculate_pagination, Page, PageRequest};
use civitas_common::time::now;
use civitas_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const USER_COLUMNS: &str = r#"
    u.id, u.email, u.full_name, u.phone, u.organization_id, u.is_active,
    u.created_at, u.updated_at,
    (SELECT GROUP_CONCAT(ur.role) FROM user_roles ur WHERE ur.user_id = u.id) AS roles
"#;

/// Fields for a new account; the password is hashed here and never stored raw
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub password: String,
    pub organization_id: Option<Uuid>,
    pub roles: Vec<Role>,
}

/// Partial profile update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub organization_id: Option<Uuid>,
    pub detach_organization: bool,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Case-insensitive substring of email or full name
    pub search: Option<String>,
}

/// Stored credentials for login
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
    pub password_salt: String,
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id: String = row.try_get("id")?;
    let organization_id: Option<String> = row.try_get("organization_id")?;
    let roles: Option<String> = row.try_get("roles")?;

    let mut roles = roles
        .unwrap_or_default()
        .split(',')
        .filter(|r| !r.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Role>>>()?;
    roles.sort();

    Ok(User {
        id: parse_uuid(&id)?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        organization_id: organization_id.as_deref().map(parse_uuid).transpose()?,
        is_active: row.try_get("is_active")?,
        roles,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a user with its roles
///
/// Duplicate emails (case-insensitive) yield `Error::Conflict`.
pub async fn create_user(pool: &SqlitePool, new_user: &NewUser) -> Result<User> {
    if new_user.roles.is_empty() {
        return Err(Error::InvalidInput("a user needs at least one role".to_string()));
    }
    if let Some(org_id) = new_user.organization_id {
        ensure_organization_exists(pool, org_id).await?;
    }

    let id = Uuid::new_v4();
    let salt = generate_salt();
    let hash = hash_password(&new_user.password, &salt);
    let timestamp = now();

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (
            id, email, full_name, phone, password_hash, password_salt,
            organization_id, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new_user.email.trim())
    .bind(new_user.full_name.trim())
    .bind(&new_user.phone)
    .bind(&hash)
    .bind(&salt)
    .bind(new_user.organization_id.map(|o| o.to_string()))
    .bind(timestamp)
    .bind(timestamp)
    .execute(&mut *tx)
    .await;

    if let Err(e) = inserted {
        let err = Error::from(e);
        if err.is_unique_violation() {
            return Err(Error::Conflict(format!(
                "email '{}' is already registered",
                new_user.email.trim()
            )));
        }
        return Err(err);
    }

    for role in &new_user.roles {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    get_user(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("user vanished after insert".to_string()))
}

pub async fn get_user(pool: &SqlitePool, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_user).transpose()
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.email = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_user).transpose()
}

/// Look up credentials for a login attempt
pub async fn find_credentials(pool: &SqlitePool, email: &str) -> Result<Option<Credentials>> {
    let sql = format!(
        "SELECT {}, u.password_hash, u.password_salt FROM users u WHERE u.email = ?",
        USER_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(Credentials {
            user: row_to_user(&row)?,
            password_hash: row.try_get("password_hash")?,
            password_salt: row.try_get("password_salt")?,
        })),
        None => Ok(None),
    }
}

fn push_user_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(role) = filter.role {
        builder
            .push(" AND EXISTS (SELECT 1 FROM user_roles f WHERE f.user_id = u.id AND f.role = ")
            .push_bind(role.as_str())
            .push(")");
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        builder
            .push(" AND (LOWER(u.email) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(u.full_name) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list_users(
    pool: &SqlitePool,
    filter: &UserFilter,
    request: &PageRequest,
) -> Result<Page<User>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users u");
    push_user_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let pagination = calculate_pagination(total, request);

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users u", USER_COLUMNS));
    push_user_filter(&mut select, filter);
    select
        .push(" ORDER BY u.created_at, u.email LIMIT ")
        .push_bind(pagination.page_size)
        .push(" OFFSET ")
        .push_bind(pagination.offset);

    let rows = select.build().fetch_all(pool).await?;
    let users = rows.iter().map(row_to_user).collect::<Result<Vec<_>>>()?;

    Ok(Page::new(users, total, pagination))
}

pub async fn update_user(pool: &SqlitePool, id: Uuid, update: &UserUpdate) -> Result<User> {
    let current = get_user(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", id)))?;

    if let Some(org_id) = update.organization_id {
        ensure_organization_exists(pool, org_id).await?;
    }

    let organization_id = if update.detach_organization {
        None
    } else {
        update.organization_id.or(current.organization_id)
    };

    sqlx::query(
        r#"
        UPDATE users
        SET full_name = ?, phone = ?, organization_id = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.full_name.as_deref().map(str::trim).unwrap_or(current.full_name.as_str()))
    .bind(update.phone.clone().or(current.phone))
    .bind(organization_id.map(|o| o.to_string()))
    .bind(update.is_active.unwrap_or(current.is_active))
    .bind(now())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    get_user(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", id)))
}

/// Replace a user's role set
pub async fn set_roles(pool: &SqlitePool, id: Uuid, roles: &[Role]) -> Result<User> {
    if roles.is_empty() {
        return Err(Error::InvalidInput("role set must not be empty".to_string()));
    }
    if get_user(pool, id).await?.is_none() {
        return Err(Error::NotFound(format!("user {}", id)));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    for role in roles {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
        .bind(now())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    get_user(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", id)))
}

/// Grant one role, keeping the others
pub async fn add_role(pool: &SqlitePool, id: Uuid, role: Role) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(role.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a user inactive; returns false when the user does not exist
pub async fn deactivate_user(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("UPDATE users SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn ensure_organization_exists(pool: &SqlitePool, org_id: Uuid) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE id = ?)")
        .bind(org_id.to_string())
        .fetch_one(pool)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("organization {} does not exist", org_id)))
    }
}
