//! Reference data seeding
//!
//! Roles, DANE geography and the incident taxonomy are embedded TOML files
//! inserted with `INSERT OR IGNORE`, so re-seeding never duplicates rows and
//! never overwrites edits made by administrators.

use crate::validation::is_dane_code;
use crate::models::Role;
use crate::{Error, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

const GEOGRAPHY_TOML: &str = include_str!("../../data/geography.toml");
const CATEGORIES_TOML: &str = include_str!("../../data/categories.toml");

#[derive(Debug, Deserialize)]
pub struct GeographySeed {
    pub departments: Vec<DepartmentSeed>,
    pub municipalities: Vec<MunicipalitySeed>,
    #[serde(default)]
    pub townships: Vec<TownshipSeed>,
}

#[derive(Debug, Deserialize)]
pub struct DepartmentSeed {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MunicipalitySeed {
    pub code: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TownshipSeed {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TaxonomySeed {
    pub categories: Vec<CategorySeed>,
}

#[derive(Debug, Deserialize)]
pub struct CategorySeed {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<SubcategorySeed>,
}

#[derive(Debug, Deserialize)]
pub struct SubcategorySeed {
    pub code: String,
    pub name: String,
}

/// Parse the embedded geography file
pub fn embedded_geography() -> Result<GeographySeed> {
    let seed: GeographySeed = toml::from_str(GEOGRAPHY_TOML)
        .map_err(|e| Error::Config(format!("Invalid geography seed: {}", e)))?;
    check_geography(&seed)?;
    Ok(seed)
}

/// Parse the embedded taxonomy file
pub fn embedded_taxonomy() -> Result<TaxonomySeed> {
    toml::from_str(CATEGORIES_TOML)
        .map_err(|e| Error::Config(format!("Invalid category seed: {}", e)))
}

/// DANE code shape and parent-prefix checks
///
/// Department = 2 digits, municipality = 5 digits under a known department,
/// township = 8 digits under a known municipality.
pub fn check_geography(seed: &GeographySeed) -> Result<()> {
    for d in &seed.departments {
        if !is_dane_code(&d.code, 2) {
            return Err(Error::Config(format!("Bad department code '{}'", d.code)));
        }
    }
    for m in &seed.municipalities {
        if !is_dane_code(&m.code, 5) {
            return Err(Error::Config(format!("Bad municipality code '{}'", m.code)));
        }
        if !seed.departments.iter().any(|d| m.code.starts_with(&d.code)) {
            return Err(Error::Config(format!(
                "Municipality '{}' has no department",
                m.code
            )));
        }
    }
    for t in &seed.townships {
        if !is_dane_code(&t.code, 8) {
            return Err(Error::Config(format!("Bad township code '{}'", t.code)));
        }
        if !seed.municipalities.iter().any(|m| t.code.starts_with(&m.code)) {
            return Err(Error::Config(format!("Township '{}' has no municipality", t.code)));
        }
    }
    Ok(())
}

/// Seed roles, geography and taxonomy (idempotent)
pub async fn seed_reference_data(pool: &SqlitePool) -> Result<()> {
    seed_roles(pool).await?;
    seed_geography(pool, &embedded_geography()?).await?;
    seed_taxonomy(pool, &embedded_taxonomy()?).await?;
    Ok(())
}

async fn seed_roles(pool: &SqlitePool) -> Result<()> {
    for role in Role::all() {
        let description = match role {
            Role::Admin => "Manages users, roles, organizations and leaders",
            Role::Leader => "Triages incidents in an assigned municipality",
            Role::Citizen => "Reports and tracks incidents",
        };
        sqlx::query("INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)")
            .bind(role.as_str())
            .bind(description)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub async fn seed_geography(pool: &SqlitePool, seed: &GeographySeed) -> Result<()> {
    let mut tx = pool.begin().await?;

    for d in &seed.departments {
        sqlx::query("INSERT OR IGNORE INTO departments (code, name) VALUES (?, ?)")
            .bind(&d.code)
            .bind(&d.name)
            .execute(&mut *tx)
            .await?;
    }

    for m in &seed.municipalities {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO municipalities (code, department_code, name, latitude, longitude)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&m.code)
        .bind(&m.code[..2])
        .bind(&m.name)
        .bind(m.latitude)
        .bind(m.longitude)
        .execute(&mut *tx)
        .await?;
    }

    for t in &seed.townships {
        sqlx::query("INSERT OR IGNORE INTO townships (code, municipality_code, name) VALUES (?, ?, ?)")
            .bind(&t.code)
            .bind(&t.code[..5])
            .bind(&t.name)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(
        "Geography seeded: {} departments, {} municipalities, {} townships",
        seed.departments.len(),
        seed.municipalities.len(),
        seed.townships.len()
    );
    Ok(())
}

pub async fn seed_taxonomy(pool: &SqlitePool, seed: &TaxonomySeed) -> Result<()> {
    let mut tx = pool.begin().await?;

    for category in &seed.categories {
        sqlx::query("INSERT OR IGNORE INTO categories (code, name) VALUES (?, ?)")
            .bind(&category.code)
            .bind(&category.name)
            .execute(&mut *tx)
            .await?;

        let category_id: i64 = sqlx::query_scalar("SELECT id FROM categories WHERE code = ?")
            .bind(&category.code)
            .fetch_one(&mut *tx)
            .await?;

        for sub in &category.subcategories {
            sqlx::query(
                "INSERT OR IGNORE INTO subcategories (category_id, code, name) VALUES (?, ?, ?)",
            )
            .bind(category_id)
            .bind(&sub.code)
            .bind(&sub.name)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}
