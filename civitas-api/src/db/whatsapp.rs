//! WhatsApp conversation state: per-phone drafts and processed message ids

use chrono::{DateTime, Utc};
use civitas_common::time::now;
use civitas_common::Result;
use sqlx::{FromRow, SqlitePool};

/// Partially collected report for one phone number
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct Draft {
    pub phone: String,
    pub description: Option<String>,
    pub image_key: Option<String>,
    pub image_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Draft {
    pub fn has_image(&self) -> bool {
        self.image_key.is_some() && self.image_url.is_some()
    }

    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.has_image() && self.has_location()
    }
}

/// Record a message id; false when it was already processed
pub async fn mark_message_processed(
    pool: &SqlitePool,
    message_id: &str,
    phone: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO whatsapp_messages (message_id, phone, received_at) VALUES (?, ?, ?)",
    )
    .bind(message_id)
    .bind(phone)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get_draft(pool: &SqlitePool, phone: &str) -> Result<Option<Draft>> {
    let draft = sqlx::query_as::<_, Draft>(
        r#"
        SELECT phone, description, image_key, image_url, latitude, longitude, address, updated_at
        FROM whatsapp_drafts
        WHERE phone = ?
        "#,
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(draft)
}

/// Append text to the draft description (newline separated)
pub async fn append_description(pool: &SqlitePool, phone: &str, text: &str) -> Result<Draft> {
    sqlx::query(
        r#"
        INSERT INTO whatsapp_drafts (phone, description, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(phone) DO UPDATE SET
            description = CASE
                WHEN description IS NULL OR description = '' THEN excluded.description
                ELSE description || char(10) || excluded.description
            END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(phone)
    .bind(text)
    .bind(now())
    .execute(pool)
    .await?;
    load(pool, phone).await
}

/// Attach (or replace) the draft photo
pub async fn set_image(
    pool: &SqlitePool,
    phone: &str,
    image_key: &str,
    image_url: &str,
) -> Result<Draft> {
    sqlx::query(
        r#"
        INSERT INTO whatsapp_drafts (phone, image_key, image_url, updated_at) VALUES (?, ?, ?, ?)
        ON CONFLICT(phone) DO UPDATE SET
            image_key = excluded.image_key,
            image_url = excluded.image_url,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(phone)
    .bind(image_key)
    .bind(image_url)
    .bind(now())
    .execute(pool)
    .await?;
    load(pool, phone).await
}

/// Attach (or replace) the draft location
pub async fn set_location(
    pool: &SqlitePool,
    phone: &str,
    latitude: f64,
    longitude: f64,
    address: Option<&str>,
) -> Result<Draft> {
    sqlx::query(
        r#"
        INSERT INTO whatsapp_drafts (phone, latitude, longitude, address, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(phone) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            address = COALESCE(excluded.address, address),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(phone)
    .bind(latitude)
    .bind(longitude)
    .bind(address)
    .bind(now())
    .execute(pool)
    .await?;
    load(pool, phone).await
}

pub async fn delete_draft(pool: &SqlitePool, phone: &str) -> Result<()> {
    sqlx::query("DELETE FROM whatsapp_drafts WHERE phone = ?")
        .bind(phone)
        .execute(pool)
        .await?;
    Ok(())
}

async fn load(pool: &SqlitePool, phone: &str) -> Result<Draft> {
    Ok(get_draft(pool, phone).await?.unwrap_or_else(|| Draft {
        phone: phone.to_string(),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use civitas_common::db::init_memory_database;

    #[tokio::test]
    async fn test_message_ids_deduplicate() {
        let pool = init_memory_database().await.unwrap();
        assert!(mark_message_processed(&pool, "wamid.1", "573001112233").await.unwrap());
        assert!(!mark_message_processed(&pool, "wamid.1", "573001112233").await.unwrap());
        assert!(mark_message_processed(&pool, "wamid.2", "573001112233").await.unwrap());
    }

    #[tokio::test]
    async fn test_draft_accumulates_pieces() {
        let pool = init_memory_database().await.unwrap();
        let phone = "573001112233";

        let draft = append_description(&pool, phone, "Alcantarilla sin tapa").await.unwrap();
        assert!(!draft.is_complete());

        let draft = append_description(&pool, phone, "frente al colegio").await.unwrap();
        assert_eq!(
            draft.description.as_deref(),
            Some("Alcantarilla sin tapa\nfrente al colegio")
        );

        let draft = set_location(&pool, phone, 6.25, -75.56, Some("Calle 10 #43")).await.unwrap();
        assert!(draft.has_location());
        assert!(!draft.has_image());

        let draft = set_image(&pool, phone, "incidents/k.jpg", "/media/incidents/k.jpg")
            .await
            .unwrap();
        assert!(draft.is_complete());
        assert_eq!(draft.address.as_deref(), Some("Calle 10 #43"));

        delete_draft(&pool, phone).await.unwrap();
        assert!(get_draft(&pool, phone).await.unwrap().is_none());
    }
}
