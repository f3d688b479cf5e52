//! Pending-call registry
//!
//! Maps the correlation id of every outstanding method call to the
//! responder that completes the caller's future. Owned by the session
//! actor, so register/resolve/drain never interleave.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::SessionError;
use crate::types::CallId;

/// Completes a waiting `call` with its payload or error
pub type Responder = oneshot::Sender<Result<Value, SessionError>>;

/// Outstanding calls keyed by correlation id
///
/// An entry is removed before its responder fires, so each call completes
/// exactly once.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<CallId, Responder>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a responder under `id`
    ///
    /// If `id` is already outstanding the existing entry is left alone and
    /// the new responder is failed with `DuplicateCorrelationId`.
    pub fn register(&mut self, id: CallId, responder: Responder) -> Result<(), SessionError> {
        if self.calls.contains_key(&id) {
            let err = SessionError::DuplicateCorrelationId(id);
            let _ = responder.send(Err(err.clone()));
            return Err(err);
        }
        self.calls.insert(id, responder);
        Ok(())
    }

    /// Complete `id` successfully; returns false if nothing was waiting
    pub fn resolve(&mut self, id: &CallId, payload: Value) -> bool {
        self.complete(id, Ok(payload))
    }

    /// Fail `id`; returns false if nothing was waiting
    pub fn reject(&mut self, id: &CallId, error: SessionError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fail every outstanding call with `error`, leaving the registry empty
    ///
    /// Returns how many calls were failed.
    pub fn drain_all(&mut self, error: SessionError) -> usize {
        let drained = self.calls.len();
        for (id, responder) in self.calls.drain() {
            debug!("Failing pending call {}: {}", id, error);
            let _ = responder.send(Err(error.clone()));
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    fn complete(&mut self, id: &CallId, result: Result<Value, SessionError>) -> bool {
        let Some(responder) = self.calls.remove(id) else {
            debug!("No pending call for id {}, dropping result", id);
            return false;
        };

        // The caller may have stopped waiting; that is not an error here.
        if responder.send(result).is_err() {
            debug!("Caller for {} went away before completion", id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_delivers_payload_once() {
        let mut pending = PendingCalls::new();
        let (tx, mut rx) = oneshot::channel();
        pending.register(CallId::from("1"), tx).unwrap();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&CallId::from("1"), json!({"ok": 1})));
        assert!(pending.is_empty());
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": 1}));

        // Second result for the same id is dropped
        assert!(!pending.resolve(&CallId::from("1"), json!(null)));
        assert!(!pending.reject(&CallId::from("1"), SessionError::ConnectionClosed));
    }

    #[test]
    fn test_reject_delivers_error() {
        let mut pending = PendingCalls::new();
        let (tx, mut rx) = oneshot::channel();
        pending.register(CallId::from("5"), tx).unwrap();

        assert!(pending.reject(&CallId::from("5"), SessionError::Protocol("bad".into())));
        assert!(matches!(rx.try_recv().unwrap(), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut pending = PendingCalls::new();
        let (tx, mut rx) = oneshot::channel();
        pending.register(CallId::from("1"), tx).unwrap();

        assert!(!pending.resolve(&CallId::from("99"), json!(1)));
        assert!(pending.contains(&CallId::from("1")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut pending = PendingCalls::new();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();

        pending.register(CallId::from("1"), first_tx).unwrap();
        let err = pending.register(CallId::from("1"), second_tx).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateCorrelationId(_)));
        assert!(matches!(
            second_rx.try_recv().unwrap(),
            Err(SessionError::DuplicateCorrelationId(_))
        ));

        // Original entry untouched
        assert!(first_rx.try_recv().is_err());
        assert!(pending.resolve(&CallId::from("1"), json!("first")));
        assert_eq!(first_rx.try_recv().unwrap().unwrap(), json!("first"));
    }

    #[test]
    fn test_drain_all_fails_everything() {
        let mut pending = PendingCalls::new();
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (tx, rx) = oneshot::channel();
            pending.register(CallId(i.to_string()), tx).unwrap();
            receivers.push(rx);
        }

        assert_eq!(pending.drain_all(SessionError::ConnectionClosed), 4);
        assert!(pending.is_empty());
        for mut rx in receivers {
            assert!(matches!(rx.try_recv().unwrap(), Err(SessionError::ConnectionClosed)));
        }

        // Draining an empty registry is harmless
        assert_eq!(pending.drain_all(SessionError::ConnectionClosed), 0);
    }

    #[test]
    fn test_dropped_caller_still_removes_entry() {
        let mut pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.register(CallId::from("1"), tx).unwrap();
        drop(rx);

        assert!(pending.resolve(&CallId::from("1"), json!(1)));
        assert!(pending.is_empty());
    }
}
