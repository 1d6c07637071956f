//! Object storage for incident photos
//!
//! Objects are addressed by relative keys (`incidents/<yyyy>/<mm>/<uuid>.<ext>`)
//! and served read-only under the configured public base URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Datelike, Utc};
use civitas_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Storage backend for uploaded media
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Public URL clients use to fetch the object
    fn url_for(&self, key: &str) -> String;
}

/// Filesystem store rooted at `<root>/uploads`
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("create {} failed: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("write {} failed: {}", key, e)))?;
        debug!(key, content_type, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(Error::Storage(format!("read {} failed: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("delete {} failed: {}", key, e))),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(Error::InvalidInput(format!("invalid object key '{}'", key)));
    }
    let path = Path::new(key);
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(Error::InvalidInput(format!("invalid object key '{}'", key)));
    }
    Ok(())
}

/// An image whose type was established from its bytes
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// Sniff and size-check raw image bytes
///
/// Only JPEG, PNG and WebP are accepted; any declared content type is ignored.
pub fn sniff_image(bytes: Vec<u8>, max_bytes: usize) -> Result<DecodedImage> {
    if bytes.is_empty() {
        return Err(Error::InvalidInput("image is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(Error::InvalidInput(format!(
            "image is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )));
    }

    let (mime_type, extension) = match infer::get(&bytes).map(|kind| kind.mime_type()) {
        Some("image/jpeg") => ("image/jpeg", "jpg"),
        Some("image/png") => ("image/png", "png"),
        Some("image/webp") => ("image/webp", "webp"),
        Some(other) => {
            return Err(Error::InvalidInput(format!("unsupported image type {}", other)))
        }
        None => return Err(Error::InvalidInput("unrecognized image data".to_string())),
    };

    Ok(DecodedImage {
        bytes,
        mime_type,
        extension,
    })
}

/// Decode a base64 (optionally `data:` URL) image and sniff it
pub fn decode_base64_image(data: &str, max_bytes: usize) -> Result<DecodedImage> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    // base64 inflates by 4/3; reject before allocating the decoded buffer
    if payload.len() / 4 * 3 > max_bytes + 3 {
        return Err(Error::InvalidInput(format!(
            "image exceeds the {} byte limit",
            max_bytes
        )));
    }

    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("image is not valid base64: {}", e)))?;
    sniff_image(bytes, max_bytes)
}

/// Storage key for a new incident image
pub fn incident_image_key(at: &DateTime<Utc>, extension: &str) -> String {
    format!(
        "incidents/{:04}/{:02}/{}.{}",
        at.year(),
        at.month(),
        Uuid::new_v4(),
        extension
    )
}

/// Key and public URL of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

pub async fn store_incident_image(
    store: &dyn ObjectStore,
    image: &DecodedImage,
    at: &DateTime<Utc>,
) -> Result<StoredObject> {
    let key = incident_image_key(at, image.extension);
    store.put(&key, &image.bytes, image.mime_type).await?;
    Ok(StoredObject {
        url: store.url_for(&key),
        key,
    })
}
