//! One-shot credential rendezvous between a suspended `start` and the
//! shell's secret-entry surface.
//!
//! The entry surface never sees the process environment; the value travels
//! only through `submit` and is held in memory by the gateway afterwards.

use std::sync::Mutex;

use tokio::sync::oneshot;

/// At most one outstanding credential request.
///
/// `request` installs a fresh one-shot channel; `submit` resolves it
/// exactly once, whichever of {submit, cancel, surface dismissal} happens
/// first. A new request while one is pending cancels the old waiter (its
/// receiver errors, which callers treat as cancellation).
#[derive(Default)]
pub struct SecretBroker {
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl SecretBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a rendezvous and return the receiving half.
    pub fn request(&self) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut pending) => {
                if pending.replace(tx).is_some() {
                    log::warn!("credential request superseded a pending one");
                }
            }
            Err(_) => log::error!("credential broker lock poisoned"),
        }
        rx
    }

    /// Resolve the pending request. Empty or whitespace-only values count
    /// as cancellation. Returns `false` when no request was pending (a
    /// later duplicate submission, or a dismissal after a submit).
    pub fn submit(&self, value: Option<String>) -> bool {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            return false;
        };

        let normalized = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        sender.send(normalized).is_ok()
    }
}
