//! Database schema migrations
//!
//! Tables are created with `CREATE TABLE IF NOT EXISTS` in `init`; anything
//! that changes an existing table goes here as a numbered migration so older
//! databases upgrade in place.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - they must stay stable for upgrades
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Idempotent** - check before ALTER so re-running is harmless
//! 4. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for incident listing and session cleanup
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status)",
        "CREATE INDEX IF NOT EXISTS idx_incidents_leader ON incidents(leader_id)",
        "CREATE INDEX IF NOT EXISTS idx_incidents_reporter ON incidents(reporter_user_id)",
        "CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_municipalities_department ON municipalities(department_code)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Migration v2: incidents may be pinned to a township
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !has_column(pool, "incidents", "township_code").await? {
        sqlx::query("ALTER TABLE incidents ADD COLUMN township_code TEXT REFERENCES townships(code)")
            .execute(pool)
            .await?;
        info!("Migration v2: Added township_code to incidents table");
    }
    Ok(())
}

/// Check whether a table has a column (used to keep ALTERs idempotent)
pub async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}
