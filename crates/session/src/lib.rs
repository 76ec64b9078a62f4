//! Per-line WhatsApp session lifecycle.
//!
//! The external WhatsApp Web client sits behind the [`WaClient`]
//! capability trait; any backend that emits the same event set can be
//! substituted. The [`LineSessionManager`] drives one small state machine
//! per line: QR provisioning, ready-phone resolution, disconnect handling
//! with auth purge on logout, delayed restart and a periodic health probe.

pub mod client;
pub mod manager;
pub mod qr;

pub use client::{ClientState, MessageHandler, WaClient, WaClientFactory, WaEvent};
pub use manager::LineSessionManager;

use thiserror::Error;

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client backend error: {0}")]
    Client(String),

    #[error("qr rendering failed: {0}")]
    Qr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
