//! Line lifecycle and parsed receipt types.

use serde::{Deserialize, Serialize};

/// Runtime status of a WhatsApp line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Initializing,
    Loading,
    Qr,
    Authenticated,
    Ready,
    Disconnected,
    Restarting,
    Error,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Loading => "loading",
            Self::Qr => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Restarting => "restarting",
            Self::Error => "error",
        }
    }

    /// Status vocabulary used by the `lines` table. The table speaks
    /// `connected` where the runtime speaks `ready`.
    pub fn db_status(&self) -> &'static str {
        match self {
            Self::Ready => "connected",
            other => other.as_str(),
        }
    }
}

/// Rendered QR provisioning image.
#[derive(Debug, Clone)]
pub struct QrImage {
    /// `data:image/png;base64,...` form for SSE/JSON consumers.
    pub data_url: String,
    /// Raw PNG bytes for the `qr.png` endpoint.
    pub png: Vec<u8>,
}

/// In-memory state for a single line, keyed by `line_id` in the registry.
///
/// Invariants (enforced by the registry mutators, not by this struct):
/// `phone.is_some()` implies `status == Ready`; `last_qr.is_some()` implies
/// `status == Qr`.
#[derive(Debug, Clone)]
pub struct LineState {
    pub status: LineStatus,
    pub phone: Option<String>,
    pub last_qr: Option<QrImage>,
    /// Immutable after first resolution.
    pub project_id: Option<String>,
}

impl Default for LineState {
    fn default() -> Self {
        Self {
            status: LineStatus::Initializing,
            phone: None,
            last_qr: None,
            project_id: None,
        }
    }
}

/// One side of a transfer (origin or destination).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: Option<String>,
    pub cuit: Option<String>,
    pub account: Option<String>,
    pub bank: Option<String>,
}

impl Party {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.cuit.is_none() && self.account.is_none() && self.bank.is_none()
    }
}

/// Result of running the recognition subsystem over a receipt candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedReceipt {
    /// Amount in Argentine pesos, when one was recognised.
    pub amount: Option<f64>,
    pub provider: Option<String>,
    pub score: u32,
    pub concept: Option<String>,
    pub transaction: Option<String>,
    pub reference: Option<String>,
    pub origin: Party,
    pub destination: Party,
}

impl ParsedReceipt {
    /// Acceptance gate: a candidate counts as a receipt only with a
    /// positive amount and a score of at least 4.
    pub fn accepted(&self) -> bool {
        self.score >= 4 && self.amount.map(|a| a > 0.0).unwrap_or(false)
    }
}

/// Mimetypes the receipt pipeline accepts.
pub const ACCEPTED_MIMETYPES: [&str; 4] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "application/pdf",
];

pub fn is_accepted_mimetype(mime: &str) -> bool {
    ACCEPTED_MIMETYPES.contains(&mime)
}

pub fn is_raster_mimetype(mime: &str) -> bool {
    matches!(mime, "image/jpeg" | "image/png" | "image/webp")
}

/// File extension for a stored receipt, derived from its mimetype.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Keep only ASCII digits from a phone identifier (`549115550001@c.us`
/// becomes `549115550001`). Used to build storage paths.
pub fn digits(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_status_maps_ready_to_connected() {
        assert_eq!(LineStatus::Ready.db_status(), "connected");
        assert_eq!(LineStatus::Qr.db_status(), "qr");
        assert_eq!(LineStatus::Restarting.db_status(), "restarting");
    }

    #[test]
    fn acceptance_requires_score_and_amount() {
        let mut receipt = ParsedReceipt {
            score: 4,
            amount: Some(1500.0),
            ..Default::default()
        };
        assert!(receipt.accepted());

        receipt.score = 3;
        assert!(!receipt.accepted());

        receipt.score = 9;
        receipt.amount = Some(0.0);
        assert!(!receipt.accepted());

        receipt.amount = None;
        assert!(!receipt.accepted());
    }

    #[test]
    fn mimetype_helpers() {
        assert!(is_accepted_mimetype("image/webp"));
        assert!(!is_accepted_mimetype("video/mp4"));
        assert!(is_raster_mimetype("image/png"));
        assert!(!is_raster_mimetype("application/pdf"));
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/pdf"), "pdf");
    }

    #[test]
    fn digits_strips_suffix() {
        assert_eq!(digits("549115550001@c.us"), "549115550001");
        assert_eq!(digits("+54 9 11 5550-001"), "549115550001");
    }
}
