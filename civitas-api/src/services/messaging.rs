//! Outbound WhatsApp messaging through the Kapso gateway
//!
//! Kapso proxies the WhatsApp Cloud API: messages are POSTed to
//! `{base}/{phone_number_id}/messages` and media ids resolve through
//! `GET {base}/{media_id}`, both authenticated with `X-API-Key`.
//!
//! The key is only ever sent to the origin of the configured base URL.
//! Direct media links from a webhook are followed only when they point at
//! that origin; anything else falls back to the media id.

use async_trait::async_trait;
use civitas_common::config::WhatsAppConfig;
use civitas_common::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("civitas/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 5;
const DEFAULT_MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

/// Where to download an inbound media object from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaRef {
    /// Gateway media id, resolved to a URL via the API
    pub id: Option<String>,
    /// Direct download link when the webhook already carries one
    pub url: Option<String>,
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a plain text message to a WhatsApp number
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;

    /// Download the bytes of an inbound media object
    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Kapso HTTP client
pub struct KapsoGateway {
    http_client: reqwest::Client,
    base_url: String,
    base: Url,
    api_key: String,
    phone_number_id: String,
    max_media_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    url: String,
}

impl KapsoGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid gateway URL {}: {}", base_url, e)))?;

        // Redirects keep custom headers, so only follow them within the gateway
        let redirect_base = base.clone();
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() < MAX_REDIRECTS
                && attempt.url().origin() == redirect_base.origin()
            {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .redirect(redirect)
            .build()
            .map_err(|e| Error::Gateway(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            base,
            api_key: api_key.into(),
            phone_number_id: phone_number_id.into(),
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        })
    }

    /// Largest media body accepted from the gateway
    pub fn with_max_media_bytes(mut self, max_media_bytes: usize) -> Self {
        self.max_media_bytes = max_media_bytes;
        self
    }

    /// Parse `raw` and keep it only when it shares the gateway's origin
    fn gateway_url(&self, raw: &str) -> Option<Url> {
        Url::parse(raw)
            .ok()
            .filter(|url| url.origin() == self.base.origin())
    }

    /// Download a media body, capped at `max_media_bytes`
    ///
    /// The API key is attached only when `url` shares the gateway origin.
    async fn download(&self, url: Url) -> Result<Vec<u8>> {
        let mut request = self.http_client.get(url.clone());
        if url.origin() == self.base.origin() {
            request = request.header("X-API-Key", &self.api_key);
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("media download failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Gateway(format!("media download returned {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_media_bytes as u64 {
                return Err(self.too_large(length));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Gateway(format!("media body read failed: {}", e)))?
        {
            if bytes.len() + chunk.len() > self.max_media_bytes {
                return Err(self.too_large((bytes.len() + chunk.len()) as u64));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn too_large(&self, length: u64) -> Error {
        Error::InvalidInput(format!(
            "media is at least {} bytes, limit is {}",
            length, self.max_media_bytes
        ))
    }
}

#[async_trait]
impl MessagingGateway for KapsoGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        debug!(to, "Sending WhatsApp message");

        let response = self
            .http_client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Gateway(format!(
                "send returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        if let Some(raw) = &media.url {
            match self.gateway_url(raw) {
                Some(url) => return self.download(url).await,
                None => warn!(url = %raw, "Ignoring media link outside the gateway origin"),
            }
        }

        let id = media
            .id
            .as_deref()
            .filter(|id| is_media_id(id))
            .ok_or_else(|| Error::InvalidInput("media has no usable id".to_string()))?;

        let response = self
            .http_client
            .get(format!("{}/{}", self.base_url, id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("media lookup failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Gateway(format!("media lookup returned {}", status)));
        }

        let info: MediaInfo = response
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("media lookup parse failed: {}", e)))?;

        let url = Url::parse(&info.url)
            .map_err(|e| Error::Gateway(format!("media lookup returned bad URL: {}", e)))?;
        self.download(url).await
    }
}

fn is_media_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !id.contains("..")
}

/// Gateway used when WhatsApp credentials are not configured
///
/// Outbound messages are logged and dropped; media cannot be fetched.
#[derive(Debug, Default)]
pub struct DisabledGateway;

#[async_trait]
impl MessagingGateway for DisabledGateway {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        info!(to, body, "WhatsApp disabled, message not sent");
        Ok(())
    }

    async fn fetch_media(&self, _media: &MediaRef) -> Result<Vec<u8>> {
        Err(Error::Gateway("WhatsApp gateway is not configured".to_string()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Build the gateway the configuration asks for
pub fn gateway_from_config(
    config: &WhatsAppConfig,
    max_media_bytes: usize,
) -> Result<std::sync::Arc<dyn MessagingGateway>> {
    match (config.api_key.as_deref(), config.phone_number_id.as_deref()) {
        (Some(key), Some(number)) if config.is_configured() => {
            info!("WhatsApp gateway enabled ({})", config.api_base_url);
            Ok(std::sync::Arc::new(
                KapsoGateway::new(&config.api_base_url, key, number)?
                    .with_max_media_bytes(max_media_bytes),
            ))
        }
        _ => {
            warn!("WhatsApp gateway not configured; outbound messages are logged only");
            Ok(std::sync::Arc::new(DisabledGateway))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const KEY: &str = "kapso-test-key";

    /// Answer every connection with `response`; yields each lowercased request head
    async fn spawn_http_server(response: Vec<u8>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).to_lowercase());
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), rx)
    }

    fn ok_response(body: &[u8], with_length: bool) -> Vec<u8> {
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n".to_vec();
        if with_length {
            response.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        response.extend_from_slice(b"\r\n");
        response.extend_from_slice(body);
        response
    }

    async fn no_request(rx: &mut mpsc::UnboundedReceiver<String>) -> bool {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    }

    fn link(url: String) -> MediaRef {
        MediaRef { id: None, url: Some(url) }
    }

    #[tokio::test]
    async fn test_disabled_gateway() {
        let gateway = DisabledGateway;
        assert!(!gateway.is_enabled());
        gateway.send_text("573001112233", "hola").await.unwrap();
        assert!(gateway.fetch_media(&MediaRef::default()).await.is_err());
    }

    #[test]
    fn test_gateway_selection() {
        let mut config = WhatsAppConfig::default();
        assert!(!gateway_from_config(&config, 1024).unwrap().is_enabled());

        config.api_key = Some("key".to_string());
        config.phone_number_id = Some("1234567890".to_string());
        assert!(gateway_from_config(&config, 1024).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_media_link_on_gateway_origin_is_downloaded() {
        let (server, mut requests) = spawn_http_server(ok_response(b"jpeg", true)).await;
        let gateway = KapsoGateway::new(format!("{}/meta/v22.0", server), KEY, "123").unwrap();

        let bytes = gateway
            .fetch_media(&link(format!("{}/media/abc", server)))
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg");

        let head = requests.recv().await.unwrap();
        assert!(head.starts_with("get /media/abc "));
        assert!(head.contains(&format!("x-api-key: {}", KEY)));
    }

    #[tokio::test]
    async fn test_foreign_media_link_never_contacted() {
        let (gateway_server, mut gateway_requests) =
            spawn_http_server(ok_response(b"", true)).await;
        let (other_server, mut other_requests) =
            spawn_http_server(ok_response(b"jpeg", true)).await;
        let gateway = KapsoGateway::new(format!("{}/meta/v22.0", gateway_server), KEY, "123")
            .unwrap();

        // Same host, different port: a different origin
        let result = gateway
            .fetch_media(&link(format!("{}/steal", other_server)))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(no_request(&mut other_requests).await);
        assert!(no_request(&mut gateway_requests).await);

        // Unusable ids are rejected before any lookup
        let traversal = MediaRef {
            id: Some("../../admin".to_string()),
            url: Some(format!("{}/steal", other_server)),
        };
        assert!(matches!(
            gateway.fetch_media(&traversal).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(no_request(&mut other_requests).await);
    }

    #[tokio::test]
    async fn test_redirect_off_gateway_not_followed() {
        let (other_server, mut other_requests) =
            spawn_http_server(ok_response(b"jpeg", true)).await;
        let redirect = format!(
            "HTTP/1.1 302 Found\r\nLocation: {}/steal\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            other_server
        );
        let (gateway_server, _gateway_requests) = spawn_http_server(redirect.into_bytes()).await;
        let gateway = KapsoGateway::new(gateway_server.clone(), KEY, "123").unwrap();

        let result = gateway
            .fetch_media(&link(format!("{}/media/abc", gateway_server)))
            .await;
        assert!(matches!(result, Err(Error::Gateway(_))));
        assert!(no_request(&mut other_requests).await);
    }

    #[tokio::test]
    async fn test_media_over_limit_rejected() {
        let body = vec![0xAB; 4096];

        let (declared, _r1) = spawn_http_server(ok_response(&body, true)).await;
        let gateway = KapsoGateway::new(declared.clone(), KEY, "123")
            .unwrap()
            .with_max_media_bytes(1024);
        let result = gateway.fetch_media(&link(format!("{}/m", declared))).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        // No Content-Length: the body is cut off while streaming
        let (streamed, _r2) = spawn_http_server(ok_response(&body, false)).await;
        let gateway = KapsoGateway::new(streamed.clone(), KEY, "123")
            .unwrap()
            .with_max_media_bytes(1024);
        let result = gateway.fetch_media(&link(format!("{}/m", streamed))).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let gateway = KapsoGateway::new(streamed.clone(), KEY, "123")
            .unwrap()
            .with_max_media_bytes(body.len());
        let bytes = gateway.fetch_media(&link(format!("{}/m", streamed))).await.unwrap();
        assert_eq!(bytes.len(), body.len());
    }
}
