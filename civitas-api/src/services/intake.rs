//! WhatsApp intake
//!
//! Kapso webhook events are mapped to [`InboundMessage`]s, de-duplicated by
//! message id, and folded into a per-phone draft. A draft holding both a
//! photo and a location is submitted as an incident.

use chrono::{DateTime, TimeZone, Utc};
use civitas_common::models::ReportChannel;
use civitas_common::time::now;
use civitas_common::validation::normalize_phone;
use civitas_common::{Coordinates, Error, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::{incidents as incident_db, whatsapp};
use crate::services::analyzer::CategoryHint;
use crate::services::incidents::{self, Report, ReportImage};
use crate::services::messaging::MediaRef;
use crate::services::storage::{self, StoredObject};
use crate::AppState;

// ========================================
// Payload mapping
// ========================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookPayload {
    Batch { data: Vec<WebhookEvent> },
    Single(WebhookEvent),
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    message: RawMessage,
    #[serde(default)]
    conversation: Option<RawConversation>,
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    from: Option<String>,
    timestamp: Option<Value>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<RawText>,
    image: Option<RawImage>,
    location: Option<RawLocation>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    id: Option<String>,
    #[serde(alias = "link")]
    url: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
    address: Option<String>,
    name: Option<String>,
}

/// Content of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text(String),
    Image {
        media: MediaRef,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        address: Option<String>,
    },
    /// Any other message type (audio, sticker, ...), by type name
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender number, digits only
    pub from: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Result of parsing a webhook body
#[derive(Debug, Default)]
pub struct ParsedWebhook {
    pub messages: Vec<InboundMessage>,
    /// Events without a usable sender
    pub unmapped: usize,
}

/// Parse a single event or a `{data: [...]}` batch
///
/// Malformed JSON (or JSON of neither shape) is `InvalidInput`.
pub fn parse_webhook(body: &[u8]) -> Result<ParsedWebhook> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidInput(format!("malformed webhook payload: {}", e)))?;

    let events = match payload {
        WebhookPayload::Batch { data } => data,
        WebhookPayload::Single(event) => vec![event],
    };

    let mut parsed = ParsedWebhook::default();
    for event in events {
        match map_event(event) {
            Some(message) => parsed.messages.push(message),
            None => parsed.unmapped += 1,
        }
    }
    Ok(parsed)
}

fn map_event(event: WebhookEvent) -> Option<InboundMessage> {
    let WebhookEvent {
        message,
        conversation,
    } = event;

    let from = message
        .from
        .clone()
        .or_else(|| conversation.and_then(|c| c.phone_number))
        .map(|p| normalize_phone(&p))
        .filter(|p| !p.is_empty())?;

    let timestamp = message
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or_else(now);

    let kind = match (message.kind.as_str(), message.text, message.image, message.location) {
        ("text", Some(text), _, _) => MessageKind::Text(text.body),
        ("image", _, Some(image), _) if image.id.is_some() || image.url.is_some() => {
            MessageKind::Image {
                media: MediaRef {
                    id: image.id,
                    url: image.url,
                },
                caption: image.caption.filter(|c| !c.trim().is_empty()),
            }
        }
        ("location", _, _, Some(loc)) => MessageKind::Location {
            latitude: loc.latitude,
            longitude: loc.longitude,
            address: loc.address.or(loc.name),
        },
        (other, ..) => MessageKind::Unsupported(other.to_string()),
    };

    Some(InboundMessage {
        message_id: message.id,
        from,
        timestamp,
        kind,
    })
}

/// Unix seconds as a JSON number or numeric string, or an RFC 3339 string
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => match s.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                return DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
        },
        _ => None,
    }?;
    Utc.timestamp_opt(seconds, 0).single()
}

// ========================================
// Conversation
// ========================================

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Message id already seen
    Duplicate,
    /// Draft updated, still waiting for more pieces
    Collected,
    /// Draft completed and submitted
    Submitted { radicate_number: String },
    /// Answered without touching the draft (status query, unsupported type)
    Replied,
}

const PROMPT_PHOTO: &str = "Envíe una foto del problema.";
const PROMPT_LOCATION: &str = "Comparta la ubicación del problema (📎 → Ubicación).";
const UNSUPPORTED_REPLY: &str =
    "Solo podemos recibir texto, fotos y ubicación. Para consultar un reporte escriba: estado <radicado>";

/// Radicate number of an `estado <RADICATE>` query
pub fn status_query(text: &str) -> Option<&str> {
    let text = text.trim();
    let (command, argument) = text.split_once(char::is_whitespace)?;
    if command.eq_ignore_ascii_case("estado") {
        let argument = argument.trim();
        (!argument.is_empty()).then_some(argument)
    } else {
        None
    }
}

fn missing_piece_prompt(draft: &whatsapp::Draft) -> String {
    match (draft.has_image(), draft.has_location()) {
        (false, false) => format!("Hemos guardado su mensaje. {} {}", PROMPT_PHOTO, PROMPT_LOCATION),
        (false, true) => format!("Ubicación recibida. {}", PROMPT_PHOTO),
        (true, false) => format!("Foto recibida. {}", PROMPT_LOCATION),
        (true, true) => String::new(),
    }
}

async fn reply(state: &AppState, to: &str, body: &str) {
    if let Err(e) = state.gateway.send_text(to, body).await {
        warn!(to, "WhatsApp reply failed: {}", e);
    }
}

/// Process one inbound message
pub async fn handle_message(state: &AppState, message: &InboundMessage) -> Result<IntakeOutcome> {
    let phone = message.from.as_str();

    if !whatsapp::mark_message_processed(&state.db, &message.message_id, phone).await? {
        debug!(message_id = %message.message_id, "Duplicate WhatsApp message skipped");
        return Ok(IntakeOutcome::Duplicate);
    }

    let draft = match &message.kind {
        MessageKind::Text(text) => {
            if let Some(radicate) = status_query(text) {
                let body = match incident_db::get_incident_by_radicate(&state.db, radicate).await? {
                    Some(incident) => incidents::status_message(&incident),
                    None => format!("No encontramos el reporte {}.", radicate.to_uppercase()),
                };
                reply(state, phone, &body).await;
                return Ok(IntakeOutcome::Replied);
            }
            let text = text.trim();
            if text.is_empty() {
                return Ok(IntakeOutcome::Replied);
            }
            whatsapp::append_description(&state.db, phone, text).await?
        }
        MessageKind::Image { media, caption } => {
            let fetched = state.gateway.fetch_media(media).await;
            let image = match fetched
                .and_then(|bytes| storage::sniff_image(bytes, state.config.storage.max_image_bytes))
            {
                Ok(image) => image,
                Err(Error::InvalidInput(reason)) => {
                    info!(phone, "Rejected WhatsApp image: {}", reason);
                    reply(state, phone, "No pudimos procesar la imagen. Envíe una foto JPG o PNG.")
                        .await;
                    return Ok(IntakeOutcome::Replied);
                }
                Err(e) => return Err(e),
            };
            let stored =
                storage::store_incident_image(state.store.as_ref(), &image, &message.timestamp)
                    .await?;
            if let Some(caption) = caption {
                whatsapp::append_description(&state.db, phone, caption.trim()).await?;
            }
            whatsapp::set_image(&state.db, phone, &stored.key, &stored.url).await?
        }
        MessageKind::Location {
            latitude,
            longitude,
            address,
        } => {
            if Coordinates::new(*latitude, *longitude).is_err() {
                reply(state, phone, "La ubicación enviada no es válida. Intente de nuevo.").await;
                return Ok(IntakeOutcome::Replied);
            }
            whatsapp::set_location(&state.db, phone, *latitude, *longitude, address.as_deref())
                .await?
        }
        MessageKind::Unsupported(kind) => {
            debug!(phone, kind = %kind, "Unsupported WhatsApp message type");
            reply(state, phone, UNSUPPORTED_REPLY).await;
            return Ok(IntakeOutcome::Replied);
        }
    };

    if !draft.is_complete() {
        reply(state, phone, &missing_piece_prompt(&draft)).await;
        return Ok(IntakeOutcome::Collected);
    }

    let radicate_number = submit_draft(state, draft).await?;
    reply(
        state,
        phone,
        &format!(
            "Reporte recibido. Su número de radicado es {}. Escriba \"estado {}\" para consultarlo.",
            radicate_number, radicate_number
        ),
    )
    .await;
    Ok(IntakeOutcome::Submitted { radicate_number })
}

async fn submit_draft(state: &AppState, draft: whatsapp::Draft) -> Result<String> {
    let (Some(key), Some(url), Some(latitude), Some(longitude)) =
        (draft.image_key, draft.image_url, draft.latitude, draft.longitude)
    else {
        return Err(Error::Internal("incomplete WhatsApp draft submitted".to_string()));
    };

    let submission = incidents::submit(
        state,
        Report {
            channel: ReportChannel::WhatsApp,
            reporter_user_id: None,
            reporter_phone: Some(draft.phone.clone()),
            description: draft.description.filter(|d| !d.trim().is_empty()),
            location: Coordinates::new(latitude, longitude)?,
            address: draft.address,
            municipality_code: None,
            township_code: None,
            hint: CategoryHint::default(),
            image: ReportImage::Stored(StoredObject { key, url }),
        },
    )
    .await?;

    whatsapp::delete_draft(&state.db, &draft.phone).await?;
    Ok(submission.incident.radicate_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_text_event() {
        let body = br#"{
            "message": {"id": "wamid.1", "from": "+57 300 111 2233", "timestamp": "1735689600",
                        "type": "text", "text": {"body": "Hueco grande"}},
            "conversation": {"phone_number": "573001112233"}
        }"#;
        let parsed = parse_webhook(body).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        let msg = &parsed.messages[0];
        assert_eq!(msg.from, "573001112233");
        assert_eq!(msg.timestamp.timestamp(), 1_735_689_600);
        assert_eq!(msg.kind, MessageKind::Text("Hueco grande".to_string()));
    }

    #[test]
    fn test_batch_with_image_location_and_unsupported() {
        let body = br#"{"data": [
            {"message": {"id": "a", "type": "image", "image": {"id": "media-1", "caption": "Poste"}},
             "conversation": {"phone_number": "573001112233"}},
            {"message": {"id": "b", "from": "573001112233", "type": "location",
                         "location": {"latitude": 6.25, "longitude": -75.57, "name": "Parque"}}},
            {"message": {"id": "c", "from": "573001112233", "type": "audio"}},
            {"message": {"id": "d", "type": "text", "text": {"body": "sin remitente"}}}
        ]}"#;
        let parsed = parse_webhook(body).unwrap();
        assert_eq!(parsed.messages.len(), 3);
        assert_eq!(parsed.unmapped, 1);

        match &parsed.messages[0].kind {
            MessageKind::Image { media, caption } => {
                assert_eq!(media.id.as_deref(), Some("media-1"));
                assert_eq!(caption.as_deref(), Some("Poste"));
            }
            other => panic!("expected image, got {:?}", other),
        }
        assert_eq!(
            parsed.messages[1].kind,
            MessageKind::Location {
                latitude: 6.25,
                longitude: -75.57,
                address: Some("Parque".to_string())
            }
        );
        assert_eq!(
            parsed.messages[2].kind,
            MessageKind::Unsupported("audio".to_string())
        );
    }

    #[test]
    fn test_image_without_media_is_unsupported() {
        let body = br#"{"message": {"id": "x", "from": "573001112233", "type": "image", "image": {}}}"#;
        let parsed = parse_webhook(body).unwrap();
        assert_eq!(
            parsed.messages[0].kind,
            MessageKind::Unsupported("image".to_string())
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(parse_webhook(b"not json").is_err());
        assert!(parse_webhook(br#"{"hello": "world"}"#).is_err());
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(
            parse_timestamp(&serde_json::json!(1735689600)).unwrap().timestamp(),
            1_735_689_600
        );
        assert!(parse_timestamp(&serde_json::json!("2025-01-01T00:00:00Z")).is_some());
        assert!(parse_timestamp(&serde_json::json!(true)).is_none());
    }

    #[test]
    fn test_status_query() {
        assert_eq!(status_query("estado INC-2025-000001"), Some("INC-2025-000001"));
        assert_eq!(status_query("  ESTADO   inc-2025-000001 "), Some("inc-2025-000001"));
        assert_eq!(status_query("estado"), None);
        assert_eq!(status_query("el estado de la vía"), None);
    }

    #[test]
    fn test_missing_piece_prompt() {
        let mut draft = whatsapp::Draft::default();
        assert!(missing_piece_prompt(&draft).contains(PROMPT_PHOTO));
        draft.image_key = Some("k".to_string());
        draft.image_url = Some("/media/k".to_string());
        let prompt = missing_piece_prompt(&draft);
        assert!(prompt.contains(PROMPT_LOCATION));
        assert!(!prompt.contains(PROMPT_PHOTO));
    }
}
