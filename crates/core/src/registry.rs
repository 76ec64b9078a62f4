//! Process-wide holders shared by the session manager, the inbound router
//! and (read-only) the HTTP layer.
//!
//! Both holders are mutated only from the single-threaded session/router
//! callbacks; the locks exist so the HTTP layer can take cheap read
//! snapshots.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;

use crate::types::{LineState, LineStatus, QrImage};

/// Per-line state registry, keyed by `line_id`.
#[derive(Default)]
pub struct LineRegistry {
    lines: RwLock<HashMap<String, LineState>>,
}

impl LineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a line's state, if the line exists.
    pub fn get(&self, line_id: &str) -> Option<LineState> {
        self.lines.read().get(line_id).cloned()
    }

    pub fn contains(&self, line_id: &str) -> bool {
        self.lines.read().contains_key(line_id)
    }

    /// Create the entry for a line if absent, returning its current state.
    pub fn ensure(&self, line_id: &str) -> LineState {
        self.lines
            .write()
            .entry(line_id.to_string())
            .or_default()
            .clone()
    }

    pub fn remove(&self, line_id: &str) {
        self.lines.write().remove(line_id);
    }

    /// Set a non-ready, non-QR status. Clears `phone` and `last_qr` so the
    /// state invariants hold: a phone is only known while ready, a QR is
    /// only valid while waiting for a scan.
    pub fn set_status(&self, line_id: &str, status: LineStatus) {
        let mut lines = self.lines.write();
        let state = lines.entry(line_id.to_string()).or_default();
        state.status = status;
        if status != LineStatus::Ready {
            state.phone = None;
        }
        if status != LineStatus::Qr {
            state.last_qr = None;
        }
    }

    /// Transition to `qr` and store the freshly rendered provisioning image.
    pub fn set_qr(&self, line_id: &str, qr: QrImage) {
        let mut lines = self.lines.write();
        let state = lines.entry(line_id.to_string()).or_default();
        state.status = LineStatus::Qr;
        state.phone = None;
        state.last_qr = Some(qr);
    }

    /// Transition to `ready` with the line's own resolved phone number.
    pub fn set_ready(&self, line_id: &str, phone: Option<String>) {
        let mut lines = self.lines.write();
        let state = lines.entry(line_id.to_string()).or_default();
        state.status = LineStatus::Ready;
        state.phone = phone;
        state.last_qr = None;
    }

    /// Record the project a line belongs to. Immutable after the first
    /// resolution; later calls with a different project are ignored.
    pub fn set_project(&self, line_id: &str, project_id: &str) {
        let mut lines = self.lines.write();
        let state = lines.entry(line_id.to_string()).or_default();
        if state.project_id.is_none() {
            state.project_id = Some(project_id.to_string());
        }
    }

    pub fn project_of(&self, line_id: &str) -> Option<String> {
        self.lines.read().get(line_id).and_then(|s| s.project_id.clone())
    }

    pub fn line_ids(&self) -> Vec<String> {
        self.lines.read().keys().cloned().collect()
    }
}

/// Bounded set of already-processed message ids.
///
/// Dedup is intra-process only. Eviction is FIFO with a fixed capacity so a
/// long-running process cannot grow without bound; within a session of
/// natural length this behaves like an unbounded set.
pub struct SeenMessages {
    capacity: usize,
    inner: RwLock<SeenInner>,
}

#[derive(Default)]
struct SeenInner {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenMessages {
    pub const DEFAULT_CAPACITY: usize = 100_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(SeenInner::default()),
        }
    }

    /// Record a message id. Returns `true` when the id is new (i.e. the
    /// message should be processed), `false` when it was already seen.
    pub fn insert(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.set.contains(id) {
            return false;
        }
        inner.set.insert(id.to_string());
        inner.order.push_back(id.to_string());
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.set.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_enforces_phone_and_qr_invariants() {
        let reg = LineRegistry::new();
        reg.set_qr(
            "l1",
            QrImage {
                data_url: "data:image/png;base64,AAAA".into(),
                png: vec![0],
            },
        );
        let state = reg.get("l1").unwrap();
        assert_eq!(state.status, LineStatus::Qr);
        assert!(state.last_qr.is_some());
        assert!(state.phone.is_none());

        reg.set_ready("l1", Some("5491155500001".into()));
        let state = reg.get("l1").unwrap();
        assert_eq!(state.status, LineStatus::Ready);
        assert!(state.last_qr.is_none(), "QR must be dropped on ready");
        assert_eq!(state.phone.as_deref(), Some("5491155500001"));

        reg.set_status("l1", LineStatus::Disconnected);
        let state = reg.get("l1").unwrap();
        assert!(state.phone.is_none(), "phone only valid while ready");
    }

    #[test]
    fn project_id_is_immutable_after_first_resolution() {
        let reg = LineRegistry::new();
        reg.set_project("l1", "proj-a");
        reg.set_project("l1", "proj-b");
        assert_eq!(reg.project_of("l1").as_deref(), Some("proj-a"));
    }

    #[test]
    fn seen_messages_dedupes_and_evicts() {
        let seen = SeenMessages::with_capacity(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c")); // evicts "a"
        assert!(!seen.contains("a"));
        assert!(seen.contains("b"));
        assert!(seen.contains("c"));
        assert_eq!(seen.len(), 2);
    }
}
