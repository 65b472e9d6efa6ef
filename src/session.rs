//! Per-upload control state: pause/resume signalling, cancellation, and the
//! registry mapping active file names to their sessions.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Final or in-flight state of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Uploading,
    Complete,
    Canceled,
    Failed,
}

impl Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::Complete => write!(f, "complete"),
            UploadState::Canceled => write!(f, "canceled"),
            UploadState::Failed => write!(f, "failed"),
        }
    }
}

/// Control surface for one file's transfer.
///
/// Holds the cancellation token and the pause flag for exactly one upload. The
/// transfer loop subscribes via [`UploadSession::gate`]; UI callbacks flip the
/// flags from the other side. Cancellation is scoped to this session only.
pub struct UploadSession {
    name: String,
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

impl UploadSession {
    fn new(name: &str) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            cancel: CancellationToken::new(),
            pause_tx,
        }
    }

    /// File name this session is keyed by.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation. Aborts the in-flight chunk request and wakes a
    /// paused loop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    /// Clear the pause flag. The in-flight chunk was never interrupted; this
    /// only lets the next chunk start.
    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    /// Flip the pause flag, returning the new paused state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !*self.pause_tx.borrow();
        let _ = self.pause_tx.send(paused);
        paused
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Subscribe to the pause/cancel signals for use inside the transfer loop.
    pub fn gate(&self) -> PauseGate {
        PauseGate {
            paused: self.pause_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Loop-side view of a session's pause flag.
///
/// Awaiting [`PauseGate::wait_ready`] suspends on the watch channel rather
/// than polling on a timer, and wakes as soon as the session is resumed or
/// canceled.
pub struct PauseGate {
    paused: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl PauseGate {
    /// Wait until the session is unpaused. Returns `false` if the session was
    /// canceled before (or while) waiting.
    pub async fn wait_ready(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*self.paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.paused.changed() => {
                    // Session handle dropped while paused: nothing can ever
                    // resume us, so stop gating.
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Registry of active sessions, keyed by file name.
///
/// Owned by the application context and passed explicitly; there is no
/// process-global state. File names are assumed unique among concurrently
/// active uploads.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<UploadSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `name`, replacing any previous entry under the
    /// same key.
    pub fn open(&mut self, name: &str) -> Arc<UploadSession> {
        let session = Arc::new(UploadSession::new(name));
        self.sessions.insert(name.to_string(), session.clone());
        session
    }

    pub fn get(&self, name: &str) -> Option<Arc<UploadSession>> {
        self.sessions.get(name).cloned()
    }

    /// Cancel the named session and drop its bookkeeping entry. Returns
    /// `false` (a no-op) if the session was already canceled and removed.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.sessions.remove(name) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping entry without signalling the session.
    ///
    /// This mirrors removing a file's row from the view: the transfer, if
    /// still running, keeps running. Callers wanting both should use
    /// [`SessionRegistry::cancel`].
    pub fn remove(&mut self, name: &str) -> Option<Arc<UploadSession>> {
        self.sessions.remove(name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_state_display_matches_expected_strings() {
        assert_eq!(UploadState::Uploading.to_string(), "uploading");
        assert_eq!(UploadState::Complete.to_string(), "complete");
        assert_eq!(UploadState::Canceled.to_string(), "canceled");
        assert_eq!(UploadState::Failed.to_string(), "failed");
    }

    #[test]
    fn toggle_pause_flips_flag() {
        let session = UploadSession::new("a.bin");
        assert!(!session.is_paused());
        assert!(session.toggle_pause());
        assert!(session.is_paused());
        assert!(!session.toggle_pause());
        assert!(!session.is_paused());
    }

    #[test]
    fn cancel_is_idempotent() {
        let session = UploadSession::new("a.bin");
        session.cancel();
        session.cancel();
        assert!(session.is_canceled());
    }

    #[test]
    fn registry_cancel_removes_entry_and_repeats_are_noops() {
        let mut registry = SessionRegistry::new();
        let session = registry.open("a.bin");
        assert!(registry.cancel("a.bin"));
        assert!(session.is_canceled());
        assert!(!registry.cancel("a.bin"));
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_remove_does_not_cancel() {
        let mut registry = SessionRegistry::new();
        let session = registry.open("a.bin");
        let removed = registry.remove("a.bin").unwrap();
        assert!(!removed.is_canceled());
        assert!(!session.is_canceled());
        assert!(registry.get("a.bin").is_none());
    }

    #[test]
    fn registry_open_replaces_existing_session() {
        let mut registry = SessionRegistry::new();
        let first = registry.open("a.bin");
        let second = registry.open("a.bin");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn gate_waits_while_paused_and_wakes_on_resume() {
        let session = UploadSession::new("a.bin");
        session.pause();
        let mut gate = session.gate();

        let wait = tokio::time::timeout(std::time::Duration::from_millis(20), gate.wait_ready());
        assert!(wait.await.is_err(), "gate should block while paused");

        session.resume();
        assert!(gate.wait_ready().await);
    }

    #[tokio::test]
    async fn gate_returns_false_when_canceled_while_paused() {
        let session = UploadSession::new("a.bin");
        session.pause();
        let mut gate = session.gate();
        session.cancel();
        assert!(!gate.wait_ready().await);
    }
}
