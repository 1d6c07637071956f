//! Organization persistence

use civitas_common::models::{parse_uuid, Organization};
use civitas_common::pagination::{calculate_pagination, Page, PageRequest};
use civitas_common::time::now;
use civitas_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrganizationFields {
    pub name: String,
    pub nit: Option<String>,
    pub description: Option<String>,
}

fn row_to_organization(row: &SqliteRow) -> Result<Organization> {
    let id: String = row.try_get("id")?;
    Ok(Organization {
        id: parse_uuid(&id)?,
        name: row.try_get("name")?,
        nit: row.try_get("nit")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn name_conflict(err: Error, name: &str) -> Error {
    if err.is_unique_violation() {
        Error::Conflict(format!("organization '{}' already exists", name))
    } else {
        err
    }
}

pub async fn create_organization(
    pool: &SqlitePool,
    fields: &OrganizationFields,
) -> Result<Organization> {
    let id = Uuid::new_v4();
    let timestamp = now();
    let name = fields.name.trim();

    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, nit, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(name)
    .bind(&fields.nit)
    .bind(&fields.description)
    .bind(timestamp)
    .bind(timestamp)
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e.into(), name))?;

    get_organization(pool, id)
        .await?
        .ok_or_else(|| Error::Internal("organization vanished after insert".to_string()))
}

pub async fn get_organization(pool: &SqlitePool, id: Uuid) -> Result<Option<Organization>> {
    let row = sqlx::query(
        "SELECT id, name, nit, description, created_at, updated_at FROM organizations WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_organization).transpose()
}

pub async fn list_organizations(
    pool: &SqlitePool,
    request: &PageRequest,
) -> Result<Page<Organization>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
        .fetch_one(pool)
        .await?;
    let pagination = calculate_pagination(total, request);

    let rows = sqlx::query(
        r#"
        SELECT id, name, nit, description, created_at, updated_at
        FROM organizations
        ORDER BY name COLLATE NOCASE
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(pagination.page_size)
    .bind(pagination.offset)
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(row_to_organization)
        .collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, pagination))
}

pub async fn update_organization(
    pool: &SqlitePool,
    id: Uuid,
    fields: &OrganizationFields,
) -> Result<Organization> {
    let name = fields.name.trim();
    let result = sqlx::query(
        "UPDATE organizations SET name = ?, nit = ?, description = ?, updated_at = ? WHERE id = ?",
    )
    .bind(name)
    .bind(&fields.nit)
    .bind(&fields.description)
    .bind(now())
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e.into(), name))?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("organization {}", id)));
    }

    get_organization(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("organization {}", id)))
}

/// Delete an organization that no user belongs to
pub async fn delete_organization(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE organization_id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    if members > 0 {
        return Err(Error::Conflict(format!(
            "organization still has {} member(s)",
            members
        )));
    }

    let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("organization {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::{create_user, NewUser};
    use civitas_common::db::init_memory_database;
    use civitas_common::models::Role;

    fn fields(name: &str) -> OrganizationFields {
        OrganizationFields {
            name: name.to_string(),
            nit: Some("890905211-1".to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let pool = init_memory_database().await.unwrap();
        let org = create_organization(&pool, &fields("Alcaldía de Medellín")).await.unwrap();
        assert_eq!(org.name, "Alcaldía de Medellín");

        let renamed = update_organization(&pool, org.id, &fields("Secretaría de Infraestructura"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "Secretaría de Infraestructura");

        let page = list_organizations(&pool, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total_items, 1);

        delete_organization(&pool, org.id).await.unwrap();
        assert!(get_organization(&pool, org.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let pool = init_memory_database().await.unwrap();
        create_organization(&pool, &fields("EPM")).await.unwrap();
        let err = create_organization(&pool, &fields("epm")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_with_members_conflicts() {
        let pool = init_memory_database().await.unwrap();
        let org = create_organization(&pool, &fields("Junta de Acción Comunal")).await.unwrap();
        create_user(
            &pool,
            &NewUser {
                email: "member@example.co".to_string(),
                full_name: "Member".to_string(),
                phone: None,
                password: "password123".to_string(),
                organization_id: Some(org.id),
                roles: vec![Role::Citizen],
            },
        )
        .await
        .unwrap();

        let err = delete_organization(&pool, org.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
