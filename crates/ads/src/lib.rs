//! Server-side conversion events for the Meta graph API.
//!
//! Events are fire-and-forget: the emitter spawns the POST and logs the
//! outcome. The contact identifier is pseudonymised with SHA-256 before it
//! leaves the process; the raw phone never reaches the payload.

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

const GRAPH_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Error)]
pub enum AdsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("graph api rejected the event ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Pixel configuration for one landing page.
#[derive(Debug, Clone)]
pub struct PixelConfig {
    pub pixel_id: String,
    pub access_token: String,
    pub test_event_code: Option<String>,
}

/// Event kinds the tracker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Lead,
    Purchase,
}

impl EventKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Purchase => "Purchase",
        }
    }
}

/// A conversion event ready to be serialised.
#[derive(Debug, Clone)]
pub struct ConversionEvent {
    pub kind: EventKind,
    /// Raw contact identifier; hashed on serialisation.
    pub contact: String,
    /// Purchase value in ARS. Ignored for `Lead`.
    pub value: Option<f64>,
    pub event_source_url: Option<String>,
}

/// SHA-256 over the lowercased, trimmed contact — the `external_id` the
/// graph API expects.
pub fn external_id(contact: &str) -> String {
    let normalised = contact.trim().to_lowercase();
    let digest = Sha256::digest(normalised.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build the graph API payload for one event.
pub fn build_payload(event: &ConversionEvent, test_event_code: Option<&str>) -> serde_json::Value {
    let mut entry = serde_json::json!({
        "event_name": event.kind.name(),
        "event_time": Utc::now().timestamp(),
        "event_id": Uuid::new_v4().to_string(),
        "action_source": "chat",
        "user_data": {
            "external_id": external_id(&event.contact),
        },
    });
    if let Some(url) = &event.event_source_url {
        entry["event_source_url"] = serde_json::json!(url);
    }
    if event.kind == EventKind::Purchase {
        entry["custom_data"] = serde_json::json!({
            "value": event.value.unwrap_or(0.0),
            "currency": "ARS",
        });
    }

    let mut payload = serde_json::json!({ "data": [entry] });
    if let Some(code) = test_event_code {
        payload["test_event_code"] = serde_json::json!(code);
    }
    payload
}

/// Meta conversion-event client.
#[derive(Clone, Default)]
pub struct AdEventClient {
    http: reqwest::Client,
}

impl AdEventClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one event and wait for the response. Prefer [`Self::emit`]
    /// from request handlers.
    pub async fn send(&self, pixel: &PixelConfig, event: &ConversionEvent) -> Result<(), AdsError> {
        let url = format!(
            "{GRAPH_BASE}/{}/events?access_token={}",
            pixel.pixel_id, pixel.access_token
        );
        let payload = build_payload(event, pixel.test_event_code.as_deref());
        let resp = self.http.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AdsError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Fire-and-forget: spawn the POST, log failures, never block the
    /// caller on ad delivery.
    pub fn emit(&self, pixel: PixelConfig, event: ConversionEvent) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.send(&pixel, &event).await {
                Ok(()) => {
                    tracing::debug!(event = event.kind.name(), pixel = %pixel.pixel_id, "ad event delivered");
                }
                Err(e) => {
                    tracing::warn!(event = event.kind.name(), pixel = %pixel.pixel_id, error = %e, "ad event failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_is_normalised_sha256() {
        // Hash must be insensitive to case and surrounding whitespace.
        assert_eq!(external_id(" 549115550001 "), external_id("549115550001"));
        assert_eq!(external_id("ABC"), external_id("abc"));
        assert_eq!(external_id("x").len(), 64);
    }

    #[test]
    fn purchase_payload_carries_value_and_currency() {
        let event = ConversionEvent {
            kind: EventKind::Purchase,
            contact: "549115550001".into(),
            value: Some(15_000.0),
            event_source_url: None,
        };
        let payload = build_payload(&event, Some("TEST123"));
        let entry = &payload["data"][0];
        assert_eq!(entry["event_name"], "Purchase");
        assert_eq!(entry["action_source"], "chat");
        assert_eq!(entry["custom_data"]["value"], 15_000.0);
        assert_eq!(entry["custom_data"]["currency"], "ARS");
        assert_eq!(payload["test_event_code"], "TEST123");
        // The raw contact must not appear anywhere in the payload.
        assert!(!payload.to_string().contains("549115550001"));
    }

    #[test]
    fn lead_payload_has_no_custom_data() {
        let event = ConversionEvent {
            kind: EventKind::Lead,
            contact: "549115550001".into(),
            value: None,
            event_source_url: Some("https://landing.example/promo".into()),
        };
        let payload = build_payload(&event, None);
        let entry = &payload["data"][0];
        assert_eq!(entry["event_name"], "Lead");
        assert!(entry.get("custom_data").is_none());
        assert_eq!(entry["event_source_url"], "https://landing.example/promo");
        assert!(payload.get("test_event_code").is_none());
    }
}
