//! Application state shared across all handlers.

use std::sync::Arc;

use cobro_config::Settings;
use cobro_core::{LineRegistry, SeenMessages};
use cobro_ingest::InboundRouter;
use cobro_persistence::SupabaseClient;
use cobro_session::LineSessionManager;

/// Shared state. The HTTP layer only reads the registry; all mutation
/// happens in session-manager and router callbacks.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<LineRegistry>,
    pub seen: Arc<SeenMessages>,
    pub store: SupabaseClient,
    pub sessions: Arc<LineSessionManager>,
    pub router: Arc<InboundRouter>,
}
