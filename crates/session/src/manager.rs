//! Per-line state machine over the external client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use cobro_core::{LineRegistry, LineStatus, QrImage};
use cobro_persistence::queries::sessions;
use cobro_persistence::SupabaseClient;

use crate::client::{ClientState, MessageHandler, WaClient, WaClientFactory, WaEvent};
use crate::qr;

/// Delay between teardown and recreation after a disconnect.
const RESTART_DELAY: Duration = Duration::from_millis(1200);
/// Ready-phone resolution: retries and spacing.
const PHONE_RETRIES: u32 = 60;
const PHONE_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Health probe interval.
const PROBE_INTERVAL: Duration = Duration::from_secs(20);

/// Shared slot holding the line's current client; the lifecycle task
/// refreshes it on every (re)creation.
type ClientSlot = Arc<Mutex<Option<Arc<dyn WaClient>>>>;

struct ActiveLine {
    client: ClientSlot,
    task: JoinHandle<()>,
}

/// Owns every line's client instance and lifecycle task.
pub struct LineSessionManager {
    registry: Arc<LineRegistry>,
    store: SupabaseClient,
    factory: Arc<dyn WaClientFactory>,
    handler: Arc<dyn MessageHandler>,
    auth_root: PathBuf,
    active: Mutex<HashMap<String, ActiveLine>>,
}

impl LineSessionManager {
    pub fn new(
        registry: Arc<LineRegistry>,
        store: SupabaseClient,
        factory: Arc<dyn WaClientFactory>,
        handler: Arc<dyn MessageHandler>,
        auth_root: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            factory,
            handler,
            auth_root: auth_root.into(),
            active: Mutex::new(HashMap::new()),
        })
    }

    fn auth_dir(&self, line_id: &str) -> PathBuf {
        self.auth_root.join(line_id)
    }

    /// Create the line's session on first demand. A line that is already
    /// running is left untouched.
    pub async fn ensure_line(self: &Arc<Self>, line_id: &str) {
        if self.active.lock().contains_key(line_id) {
            return;
        }

        // Resolve and pin the project before any persistence writes.
        if self.registry.project_of(line_id).is_none() {
            match sessions::project_of_line(&self.store, line_id).await {
                Ok(Some(project)) => self.registry.set_project(line_id, &project),
                Ok(None) => {
                    tracing::warn!(line_id, "line has no project row; session rows will be skipped")
                }
                Err(e) => tracing::warn!(line_id, error = %e, "project lookup failed"),
            }
        }

        self.spawn_line(line_id).await;
    }

    async fn spawn_line(self: &Arc<Self>, line_id: &str) {
        let manager = Arc::clone(self);
        let line = line_id.to_string();

        self.registry.ensure(line_id);
        let slot: ClientSlot = Arc::new(Mutex::new(None));
        let task_slot = Arc::clone(&slot);

        let task = tokio::spawn(async move {
            manager.run_line(line, task_slot).await;
        });

        self.active
            .lock()
            .insert(line_id.to_string(), ActiveLine { client: slot, task });
    }

    /// Full lifecycle loop for one line: create, consume events, restart
    /// on disconnect, stop on unrecoverable error.
    async fn run_line(self: Arc<Self>, line_id: String, client_slot: ClientSlot) {
        loop {
            self.transition(&line_id, LineStatus::Initializing).await;

            let created = self
                .factory
                .create(&line_id, &self.auth_dir(&line_id))
                .await;
            let (client, mut events) = match created {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(line_id = %line_id, error = %e, "client creation failed");
                    self.transition(&line_id, LineStatus::Error).await;
                    return;
                }
            };
            *client_slot.lock() = Some(Arc::clone(&client));

            if let Err(e) = client.initialize().await {
                tracing::error!(line_id = %line_id, error = %e, "client initialization failed");
                self.transition(&line_id, LineStatus::Error).await;
                return;
            }

            let mut restart = false;
            while let Some(event) = events.recv().await {
                match event {
                    WaEvent::LoadingScreen => {
                        self.transition(&line_id, LineStatus::Loading).await;
                    }
                    WaEvent::Qr(payload) => {
                        self.on_qr(&line_id, &payload).await;
                    }
                    WaEvent::Authenticated => {
                        self.transition(&line_id, LineStatus::Authenticated).await;
                    }
                    WaEvent::Ready => {
                        self.on_ready(&line_id, client.as_ref()).await;
                    }
                    WaEvent::Message(msg) | WaEvent::MessageCreate(msg) => {
                        // Sequential await keeps per-line delivery order.
                        self.handler.handle(&line_id, msg).await;
                    }
                    WaEvent::Disconnected(reason) => {
                        self.on_disconnected(&line_id, &reason, client.as_ref()).await;
                        restart = true;
                        break;
                    }
                }
            }

            if !restart {
                // Event stream closed without a disconnect: treat as one.
                tracing::warn!(line_id = %line_id, "event stream closed; restarting");
                self.on_disconnected(&line_id, "stream closed", client.as_ref())
                    .await;
            }

            self.transition(&line_id, LineStatus::Restarting).await;
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }

    async fn on_qr(&self, line_id: &str, payload: &str) {
        match qr::render(payload) {
            Ok(image) => {
                self.registry.set_qr(line_id, image);
                self.persist_session(line_id, LineStatus::Qr, None).await;
            }
            Err(e) => tracing::warn!(line_id, error = %e, "qr rendering failed"),
        }
    }

    async fn on_ready(&self, line_id: &str, client: &dyn WaClient) {
        let mut phone = None;
        for _ in 0..PHONE_RETRIES {
            phone = client.own_phone().await;
            if phone.is_some() {
                break;
            }
            tokio::time::sleep(PHONE_RETRY_DELAY).await;
        }
        if phone.is_none() {
            tracing::warn!(line_id, "own phone not resolved after retries");
        }

        self.registry.set_ready(line_id, phone.clone());
        self.persist_session(line_id, LineStatus::Ready, phone.as_deref())
            .await;
        if let Some(project) = self.registry.project_of(line_id) {
            if let Err(e) = sessions::upsert_line(
                &self.store,
                line_id,
                &project,
                LineStatus::Ready.db_status(),
                phone.as_deref(),
            )
            .await
            {
                tracing::warn!(line_id, error = %e, "line row upsert failed");
            }
        }
        tracing::info!(line_id, phone = phone.as_deref().unwrap_or("<unknown>"), "line ready");
    }

    async fn on_disconnected(&self, line_id: &str, reason: &str, client: &dyn WaClient) {
        tracing::warn!(line_id, reason, "line disconnected");
        if reason.to_lowercase().contains("logout") {
            self.purge_auth(line_id).await;
        }
        if let Err(e) = client.destroy().await {
            tracing::debug!(line_id, error = %e, "client destroy failed");
        }
        self.transition(line_id, LineStatus::Disconnected).await;
    }

    /// Remove the line's auth directory (after a LOGOUT, the stored
    /// credentials are invalid and poison the next connect).
    async fn purge_auth(&self, line_id: &str) {
        let dir = self.auth_dir(line_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(line_id, dir = %dir.display(), "auth store purged"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(line_id, error = %e, "auth purge failed"),
        }
    }

    async fn transition(&self, line_id: &str, status: LineStatus) {
        self.registry.set_status(line_id, status);
        self.persist_session(line_id, status, None).await;
    }

    async fn persist_session(&self, line_id: &str, status: LineStatus, phone: Option<&str>) {
        // project_id is NOT NULL on the session row; without one the
        // write is skipped rather than rejected.
        let Some(project) = self.registry.project_of(line_id) else {
            return;
        };
        if let Err(e) =
            sessions::upsert_session(&self.store, line_id, &project, status.as_str(), phone).await
        {
            tracing::warn!(line_id, status = status.as_str(), error = %e, "session row upsert failed");
        }
        if let Err(e) = sessions::mark_line_status(&self.store, line_id, status.db_status()).await {
            tracing::debug!(line_id, error = %e, "line status update failed");
        }
    }

    /// Explicit restart: purge auth, tear the client down, respawn.
    pub async fn restart_line(self: &Arc<Self>, line_id: &str) {
        let removed = self.active.lock().remove(line_id);
        if let Some(active) = removed {
            active.task.abort();
            let client = active.client.lock().take();
            if let Some(client) = client {
                if let Err(e) = client.destroy().await {
                    tracing::debug!(line_id, error = %e, "client destroy failed");
                }
            }
        }
        self.purge_auth(line_id).await;
        self.registry.remove(line_id);
        self.ensure_line(line_id).await;
    }

    /// Reconcile every active line's state against the client's own
    /// report. Runs forever; spawn it once at startup.
    pub async fn run_health_probe(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let lines: Vec<(String, Arc<dyn WaClient>)> = self
                .active
                .lock()
                .iter()
                .filter_map(|(id, a)| {
                    a.client.lock().clone().map(|client| (id.clone(), client))
                })
                .collect();

            for (line_id, client) in lines {
                match client.state().await {
                    Ok(ClientState::Connected) => {
                        let current = self.registry.get(&line_id).map(|s| s.status);
                        if current != Some(LineStatus::Ready) {
                            let phone = client.own_phone().await;
                            self.registry.set_ready(&line_id, phone.clone());
                            self.persist_session(&line_id, LineStatus::Ready, phone.as_deref())
                                .await;
                        }
                    }
                    Ok(ClientState::Other(state)) => {
                        tracing::debug!(line_id = %line_id, state = %state, "probe: client not connected");
                        self.transition(&line_id, LineStatus::Disconnected).await;
                    }
                    Err(e) => {
                        tracing::debug!(line_id = %line_id, error = %e, "probe: state query failed");
                        self.transition(&line_id, LineStatus::Disconnected).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionError;
    use async_trait::async_trait;
    use cobro_core::InboundMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Scripted backend: plays a fixed event sequence once.
    struct ScriptedFactory {
        events: Vec<WaEvent>,
        creations: AtomicUsize,
    }

    struct ScriptedClient;

    #[async_trait]
    impl WaClient for ScriptedClient {
        async fn initialize(&self) -> Result<(), SessionError> {
            Ok(())
        }
        async fn state(&self) -> Result<ClientState, SessionError> {
            Ok(ClientState::Connected)
        }
        async fn own_phone(&self) -> Option<String> {
            Some("5491155500001".into())
        }
        async fn destroy(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[async_trait]
    impl WaClientFactory for ScriptedFactory {
        async fn create(
            &self,
            _line_id: &str,
            _auth_dir: &std::path::Path,
        ) -> Result<(Arc<dyn WaClient>, mpsc::Receiver<WaEvent>), SessionError> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            let events = self.events.clone();
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                // Keep the channel open so the loop idles afterwards.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(tx);
            });
            Ok((Arc::new(ScriptedClient), rx))
        }
    }

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _line_id: &str, _message: InboundMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            chat_id: "549115550002@c.us".into(),
            from: "549115550002@c.us".into(),
            body: "hola".into(),
            timestamp: 0,
            from_me: false,
            sender_name: None,
            avatar_url: None,
            media: None,
        }
    }

    fn test_manager(
        events: Vec<WaEvent>,
        handler: Arc<dyn MessageHandler>,
    ) -> (Arc<LineSessionManager>, Arc<LineRegistry>) {
        let registry = Arc::new(LineRegistry::new());
        let store = SupabaseClient::new("http://127.0.0.1:1", "test-key");
        let factory = Arc::new(ScriptedFactory {
            events,
            creations: AtomicUsize::new(0),
        });
        let manager = LineSessionManager::new(
            Arc::clone(&registry),
            store,
            factory,
            handler,
            std::env::temp_dir().join("cobro-session-tests"),
        );
        (manager, registry)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn qr_then_ready_reaches_ready_with_phone() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (manager, registry) = test_manager(
            vec![
                WaEvent::LoadingScreen,
                WaEvent::Qr("2@provision-payload".into()),
                WaEvent::Authenticated,
                WaEvent::Ready,
            ],
            handler,
        );
        manager.ensure_line("l1").await;

        wait_for(|| {
            registry
                .get("l1")
                .map(|s| s.status == LineStatus::Ready)
                .unwrap_or(false)
        })
        .await;

        let state = registry.get("l1").unwrap();
        assert_eq!(state.phone.as_deref(), Some("5491155500001"));
        assert!(state.last_qr.is_none(), "QR cleared once ready");
    }

    #[tokio::test]
    async fn qr_event_stores_rendered_image() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (manager, registry) =
            test_manager(vec![WaEvent::Qr("2@payload".into())], handler);
        manager.ensure_line("l1").await;

        wait_for(|| {
            registry
                .get("l1")
                .map(|s| s.last_qr.is_some())
                .unwrap_or(false)
        })
        .await;

        let state = registry.get("l1").unwrap();
        assert_eq!(state.status, LineStatus::Qr);
        assert!(state
            .last_qr
            .as_ref()
            .unwrap()
            .data_url
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn messages_are_dispatched_in_order() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let counting = Arc::clone(&handler);
        let (manager, _registry) = test_manager(
            vec![
                WaEvent::Ready,
                WaEvent::Message(message("m1")),
                WaEvent::MessageCreate(message("m2")),
            ],
            handler,
        );
        manager.ensure_line("l1").await;

        wait_for(|| counting.0.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn disconnect_schedules_restart() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (manager, registry) = test_manager(
            vec![WaEvent::Ready, WaEvent::Disconnected("NAVIGATION".into())],
            handler,
        );
        manager.ensure_line("l1").await;

        // The line passes through disconnected/restarting and is created
        // again after the delay.
        wait_for(|| {
            registry
                .get("l1")
                .map(|s| {
                    matches!(
                        s.status,
                        LineStatus::Disconnected | LineStatus::Restarting | LineStatus::Initializing
                    )
                })
                .unwrap_or(false)
        })
        .await;
    }
}
