//! Shared domain types and process-wide state holders for Cobro.
//!
//! Everything that more than one crate needs lives here: line lifecycle
//! types, the inbound message shape, parsed receipt structures, and the
//! two process-wide holders (line registry, seen-message set) that the
//! session manager and the inbound router share.

pub mod message;
pub mod registry;
pub mod types;

pub use message::{InboundMessage, MediaPayload};
pub use registry::{LineRegistry, SeenMessages};
pub use types::{
    digits, extension_for, is_accepted_mimetype, is_raster_mimetype, LineState, LineStatus,
    ParsedReceipt, Party, QrImage, ACCEPTED_MIMETYPES,
};
