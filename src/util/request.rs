//! Request/reply correlation.
//!
//! Allocates session-local u32 request ids and pairs them with one-shot
//! completion channels. Each pending request resolves exactly once: by
//! reply, by error, or by deadline. Ids wrap around but are never reused
//! while still outstanding.

use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

struct PendingRequest<T, E> {
    reply_tx: oneshot::Sender<Result<T, E>>,
    deadline_ms: u64,
}

/// Correlates outgoing requests with their replies.
pub struct RequestReplyHelper<T, E: Clone> {
    next_id: u32,
    timeout_ms: u64,
    timeout_error: E,
    pending: HashMap<u32, PendingRequest<T, E>>,
}

impl<T, E: Clone> RequestReplyHelper<T, E> {
    /// Create a helper whose requests expire after `timeout_ms`,
    /// rejecting with `timeout_error`.
    pub fn new(timeout_ms: u64, timeout_error: E) -> Self {
        Self {
            next_id: 0,
            timeout_ms,
            timeout_error,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next request id and register its pending entry.
    ///
    /// Returns the id together with the receiving half of the completion
    /// channel. The deadline is armed relative to `now_ms`.
    pub fn prepare_request(&mut self, now_ms: u64) -> (u32, oneshot::Receiver<Result<T, E>>) {
        // Skip ids still outstanding so a wrapped counter cannot collide.
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&self.next_id) {
                break;
            }
        }
        let id = self.next_id;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                reply_tx,
                deadline_ms: now_ms.saturating_add(self.timeout_ms),
            },
        );
        (id, reply_rx)
    }

    /// Resolve a pending request. No-op when the id is unknown
    /// (already resolved or timed out); returns whether it resolved.
    pub fn register_reply(&mut self, id: u32, value: T) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                // The caller may have dropped the receiver; that is fine.
                let _ = pending.reply_tx.send(Ok(value));
                true
            }
            None => {
                debug!(id, "Reply for unknown request id, ignoring");
                false
            }
        }
    }

    /// Reject a pending request. Same idempotence as [`register_reply`].
    ///
    /// [`register_reply`]: RequestReplyHelper::register_reply
    pub fn register_error(&mut self, id: u32, error: E) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                let _ = pending.reply_tx.send(Err(error));
                true
            }
            None => {
                debug!(id, "Error for unknown request id, ignoring");
                false
            }
        }
    }

    /// Reject every request whose deadline has passed. Returns how many
    /// fired.
    pub fn poll_timeouts(&mut self, now_ms: u64) -> usize {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                debug!(id, "Request timed out");
                let _ = pending.reply_tx.send(Err(self.timeout_error.clone()));
            }
        }
        expired.len()
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check whether an id is outstanding.
    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    #[cfg(test)]
    fn set_next_id(&mut self, id: u32) {
        self.next_id = id;
    }
}
