//! Row models. Column names are contractual; the structs serialise 1:1
//! into the PostgREST payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `lines` — one row per provisioned WhatsApp line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRow {
    pub id: String,
    pub project_id: String,
    /// One of `initializing`, `loading`, `qr`, `authenticated`,
    /// `connected`, `disconnected`, `restarting`, `error`, `qr_ready`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// `whatsapp_sessions` — live session mirror, conflict key `line_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub line_id: String,
    pub project_id: String,
    pub wa_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_phone: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `analytics_chats` — one row per inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRow {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_phone: Option<String>,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `wa_contact_names` — display name / avatar cache, conflict key
/// `(project_id, phone)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactNameRow {
    pub project_id: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `agenda` — contact funnel state, conflict key `(project_id, contact)`.
/// `status` moves `new → conversion` and never backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaRow {
    pub project_id: String,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page_id: Option<String>,
    pub status: String,
    pub last_message_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `analytics_leads` — first contact per `(project_id, contact)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRow {
    pub project_id: String,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `analytics_conversions` — one row per accepted receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRow {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wa_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub file_mime: String,
    pub amount: f64,
    pub status: String,
    pub line_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_cuit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_bank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_cuit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_bank: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `pages` — ad pixel configuration per landing page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub fb_pixel_id: Option<String>,
    #[serde(default)]
    pub fb_access_token: Option<String>,
    #[serde(default)]
    pub fb_test_event_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_fields_are_omitted_from_payloads() {
        let row = LineRow {
            id: "l1".into(),
            project_id: "p1".into(),
            status: "connected".into(),
            phone: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("phone").is_none());
        assert_eq!(json["status"], "connected");
    }

    #[test]
    fn conversion_row_serialises_contractual_columns() {
        let row = ConversionRow {
            project_id: "p1".into(),
            page_id: None,
            slug: None,
            contact: "549115550001".into(),
            wa_phone: Some("549115550002".into()),
            file_url: None,
            file_mime: "image/jpeg".into(),
            amount: 15000.0,
            status: "received".into(),
            line_id: "l1".into(),
            concept: None,
            reference: Some("AB-12".into()),
            operation_no: None,
            origin_name: None,
            origin_cuit: Some("20123456789".into()),
            origin_account: None,
            origin_bank: None,
            dest_name: None,
            dest_cuit: None,
            dest_account: None,
            dest_bank: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["amount"], 15000.0);
        assert_eq!(json["origin_cuit"], "20123456789");
        assert_eq!(json["status"], "received");
        assert!(json.get("dest_bank").is_none());
    }
}
