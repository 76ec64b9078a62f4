//! Capability traits over the external WhatsApp Web client.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cobro_core::InboundMessage;

use crate::SessionError;

/// Events the backend emits over a line's lifetime.
#[derive(Debug, Clone)]
pub enum WaEvent {
    LoadingScreen,
    /// Raw QR payload to be rendered for scanning.
    Qr(String),
    Authenticated,
    Ready,
    /// Message received from another party.
    Message(InboundMessage),
    /// Message created on the account (covers some device sync paths;
    /// self-originated ones are filtered by the router).
    MessageCreate(InboundMessage),
    Disconnected(String),
}

/// Coarse connection state reported by the backend's health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Other(String),
}

/// One live client instance bound to a line's auth store.
#[async_trait]
pub trait WaClient: Send + Sync {
    /// Start the backend. Events begin flowing after this resolves.
    async fn initialize(&self) -> Result<(), SessionError>;

    /// Current connection state, for the health probe.
    async fn state(&self) -> Result<ClientState, SessionError>;

    /// The line's own phone number, known once authenticated and ready.
    async fn own_phone(&self) -> Option<String>;

    /// Tear down browser handles. Best-effort; errors are logged.
    async fn destroy(&self) -> Result<(), SessionError>;
}

/// Builds a client bound to a line's auth directory.
#[async_trait]
pub trait WaClientFactory: Send + Sync {
    async fn create(
        &self,
        line_id: &str,
        auth_dir: &Path,
    ) -> Result<(std::sync::Arc<dyn WaClient>, mpsc::Receiver<WaEvent>), SessionError>;
}

/// Downstream consumer of inbound messages (the router). Lives here so
/// the session crate does not depend on the ingest crate.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, line_id: &str, message: InboundMessage);
}
