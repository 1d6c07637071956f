//! Read-only reference data: DANE geography and the incident taxonomy

use civitas_common::models::{Category, Department, Municipality, Subcategory, Township};
use civitas_common::{Error, Result};
use sqlx::SqlitePool;

pub async fn list_departments(pool: &SqlitePool) -> Result<Vec<Department>> {
    let departments = sqlx::query_as::<_, Department>(
        "SELECT code, name FROM departments ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(departments)
}

pub async fn get_department(pool: &SqlitePool, code: &str) -> Result<Option<Department>> {
    let department =
        sqlx::query_as::<_, Department>("SELECT code, name FROM departments WHERE code = ?")
            .bind(code)
            .fetch_optional(pool)
            .await?;
    Ok(department)
}

/// Municipalities of a department; unknown department → `NotFound`
pub async fn list_municipalities(
    pool: &SqlitePool,
    department_code: &str,
) -> Result<Vec<Municipality>> {
    if get_department(pool, department_code).await?.is_none() {
        return Err(Error::NotFound(format!("department {}", department_code)));
    }

    let municipalities = sqlx::query_as::<_, Municipality>(
        r#"
        SELECT code, department_code, name, latitude, longitude
        FROM municipalities
        WHERE department_code = ?
        ORDER BY name
        "#,
    )
    .bind(department_code)
    .fetch_all(pool)
    .await?;
    Ok(municipalities)
}

pub async fn get_municipality(pool: &SqlitePool, code: &str) -> Result<Option<Municipality>> {
    let municipality = sqlx::query_as::<_, Municipality>(
        "SELECT code, department_code, name, latitude, longitude FROM municipalities WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(municipality)
}

/// Townships of a municipality; unknown municipality → `NotFound`
pub async fn list_townships(pool: &SqlitePool, municipality_code: &str) -> Result<Vec<Township>> {
    if get_municipality(pool, municipality_code).await?.is_none() {
        return Err(Error::NotFound(format!("municipality {}", municipality_code)));
    }

    let townships = sqlx::query_as::<_, Township>(
        "SELECT code, municipality_code, name FROM townships WHERE municipality_code = ? ORDER BY code",
    )
    .bind(municipality_code)
    .fetch_all(pool)
    .await?;
    Ok(townships)
}

pub async fn get_township(pool: &SqlitePool, code: &str) -> Result<Option<Township>> {
    let township = sqlx::query_as::<_, Township>(
        "SELECT code, municipality_code, name FROM townships WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(township)
}

/// All categories with their subcategories nested
pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    let categories: Vec<(i64, String, String)> =
        sqlx::query_as("SELECT id, code, name FROM categories ORDER BY id")
            .fetch_all(pool)
            .await?;

    let subcategories = sqlx::query_as::<_, Subcategory>(
        "SELECT id, category_id, code, name FROM subcategories ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(categories
        .into_iter()
        .map(|(id, code, name)| Category {
            id,
            code,
            name,
            subcategories: subcategories
                .iter()
                .filter(|s| s.category_id == id)
                .cloned()
                .collect(),
        })
        .collect())
}

/// Subcategories of one category; unknown category → `NotFound`
pub async fn list_subcategories(pool: &SqlitePool, category_id: i64) -> Result<Vec<Subcategory>> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?)")
        .bind(category_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(Error::NotFound(format!("category {}", category_id)));
    }

    let subcategories = sqlx::query_as::<_, Subcategory>(
        "SELECT id, category_id, code, name FROM subcategories WHERE category_id = ? ORDER BY id",
    )
    .bind(category_id)
    .fetch_all(pool)
    .await?;
    Ok(subcategories)
}

pub async fn find_category_id(pool: &SqlitePool, code: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM categories WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

pub async fn category_name(pool: &SqlitePool, id: i64) -> Result<Option<String>> {
    let name = sqlx::query_scalar("SELECT name FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

pub async fn find_subcategory_by_code(
    pool: &SqlitePool,
    code: &str,
) -> Result<Option<Subcategory>> {
    let sub = sqlx::query_as::<_, Subcategory>(
        "SELECT id, category_id, code, name FROM subcategories WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(sub)
}

pub async fn get_subcategory(pool: &SqlitePool, id: i64) -> Result<Option<Subcategory>> {
    let sub = sqlx::query_as::<_, Subcategory>(
        "SELECT id, category_id, code, name FROM subcategories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(sub)
}

/// Category and subcategory codes as (category_code, subcategory_code) pairs
pub async fn taxonomy_codes(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let pairs = sqlx::query_as(
        r#"
        SELECT c.code, s.code
        FROM subcategories s
        JOIN categories c ON c.id = s.category_id
        ORDER BY s.id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(pairs)
}
