//! Sidecar bridge to the external WhatsApp Web client.
//!
//! The browser automation stays outside this process. A helper command
//! (`WA_BRIDGE_CMD`) is spawned per line with the line's auth directory in
//! its environment; it pushes newline-delimited JSON events on stdout and
//! accepts one-word commands on stdin. Any backend that speaks the same
//! event set can be substituted.
//!
//! Event lines:
//! `{"event":"loading_screen"}`, `{"event":"qr","data":"..."}`,
//! `{"event":"authenticated"}`, `{"event":"ready","phone":"549..."}`,
//! `{"event":"message","message":{...}}`, `{"event":"message_create",...}`,
//! `{"event":"state","state":"CONNECTED"}`,
//! `{"event":"disconnected","reason":"LOGOUT"}`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use cobro_core::InboundMessage;
use cobro_session::{ClientState, SessionError, WaClient, WaClientFactory, WaEvent};

/// One stdout line from the sidecar.
#[derive(Debug, Deserialize)]
struct BridgeLine {
    event: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<InboundMessage>,
}

pub struct SidecarFactory {
    /// Helper command; `None` leaves lines unprovisioned (the HTTP
    /// surface and `/dev/incoming` still work).
    command: Option<String>,
    browser_path: Option<String>,
}

impl SidecarFactory {
    pub fn new(command: Option<String>, browser_path: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            command,
            browser_path,
        })
    }
}

#[async_trait]
impl WaClientFactory for SidecarFactory {
    async fn create(
        &self,
        line_id: &str,
        auth_dir: &Path,
    ) -> Result<(Arc<dyn WaClient>, mpsc::Receiver<WaEvent>), SessionError> {
        let Some(command) = &self.command else {
            return Err(SessionError::Client(
                "WA_BRIDGE_CMD not configured; line cannot be provisioned".into(),
            ));
        };

        let mut cmd = Command::new(command);
        cmd.env("WA_LINE_ID", line_id)
            .env("WA_AUTH_DIR", auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(browser) = &self.browser_path {
            cmd.env("PUPPETEER_EXECUTABLE_PATH", browser);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Client(format!("bridge spawn failed: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Client("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Client("bridge stdout unavailable".into()))?;

        let (tx, rx) = mpsc::channel(256);
        let client = Arc::new(SidecarClient {
            line_id: line_id.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            last_state: Mutex::new(ClientState::Other("initializing".into())),
            phone: Mutex::new(None),
        });

        // Reader task: sidecar stdout → WaEvent stream.
        let reader_client = Arc::clone(&client);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let parsed: BridgeLine = match serde_json::from_str(&line) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "bridge emitted unparsable line");
                        continue;
                    }
                };
                let event = match parsed.event.as_str() {
                    "loading_screen" => Some(WaEvent::LoadingScreen),
                    "qr" => parsed.data.map(WaEvent::Qr),
                    "authenticated" => Some(WaEvent::Authenticated),
                    "ready" => {
                        *reader_client.phone.lock() = parsed.phone;
                        *reader_client.last_state.lock() = ClientState::Connected;
                        Some(WaEvent::Ready)
                    }
                    "state" => {
                        let state = parsed.state.unwrap_or_default();
                        *reader_client.last_state.lock() = if state == "CONNECTED" {
                            ClientState::Connected
                        } else {
                            ClientState::Other(state)
                        };
                        None
                    }
                    "message" => parsed.message.map(WaEvent::Message),
                    "message_create" => parsed.message.map(WaEvent::MessageCreate),
                    "disconnected" => {
                        *reader_client.last_state.lock() =
                            ClientState::Other("disconnected".into());
                        Some(WaEvent::Disconnected(
                            parsed.reason.unwrap_or_else(|| "unknown".into()),
                        ))
                    }
                    other => {
                        tracing::debug!(event = other, "bridge emitted unknown event");
                        None
                    }
                };
                if let Some(event) = event {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            // Stdout closed: the sidecar died.
            let _ = tx
                .send(WaEvent::Disconnected("bridge exited".into()))
                .await;
        });

        Ok((client, rx))
    }
}

struct SidecarClient {
    line_id: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    last_state: Mutex<ClientState>,
    phone: Mutex<Option<String>>,
}

impl SidecarClient {
    async fn send_command(&self, cmd: &str) -> Result<(), SessionError> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| SessionError::Client(format!("bridge command {cmd} failed: {e}")))
    }
}

#[async_trait]
impl WaClient for SidecarClient {
    async fn initialize(&self) -> Result<(), SessionError> {
        self.send_command("initialize").await
    }

    async fn state(&self) -> Result<ClientState, SessionError> {
        // Nudge the sidecar to refresh, then report the cached state; the
        // probe tolerates one interval of staleness.
        let _ = self.send_command("state").await;
        Ok(self.last_state.lock().clone())
    }

    async fn own_phone(&self) -> Option<String> {
        self.phone.lock().clone()
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        let _ = self.send_command("destroy").await;
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(line_id = %self.line_id, error = %e, "bridge kill failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_factory_refuses_to_provision() {
        let factory = SidecarFactory::new(None, None);
        let err = factory
            .create("l1", Path::new("/tmp/auth"))
            .await
            .err()
            .expect("must refuse");
        assert!(matches!(err, SessionError::Client(_)));
    }

    #[test]
    fn bridge_lines_parse() {
        let line: BridgeLine =
            serde_json::from_str(r#"{"event":"qr","data":"2@abc"}"#).unwrap();
        assert_eq!(line.event, "qr");
        assert_eq!(line.data.as_deref(), Some("2@abc"));

        let line: BridgeLine = serde_json::from_str(
            r#"{"event":"message","message":{"id":"m1","chat_id":"5491155@c.us","from":"5491155@c.us","body":"hola","timestamp":1}}"#,
        )
        .unwrap();
        assert_eq!(line.message.unwrap().body, "hola");

        let line: BridgeLine =
            serde_json::from_str(r#"{"event":"disconnected","reason":"LOGOUT"}"#).unwrap();
        assert_eq!(line.reason.as_deref(), Some("LOGOUT"));
    }
}
