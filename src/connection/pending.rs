//! Outstanding request table.
//!
//! Maps correlation ids to the single-use slot their caller is waiting on.
//! An entry leaves the table exactly once: when its response arrives, when
//! its caller times out, or when the link fails. Whoever removes the entry
//! owns its resolution, so no slot is resolved twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::oneshot;

use super::ConnectionError;

pub(crate) type Outcome = Result<serde_json::Value, ConnectionError>;

struct PendingRequest {
    slot: oneshot::Sender<Outcome>,
    created_at: Instant,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        match self.entries.lock() {
            Ok(e) => e,
            Err(p) => p.into_inner(),
        }
    }

    /// Register `id`. Returns `None` if the id is already outstanding.
    pub(crate) fn register(&self, id: &str) -> Option<oneshot::Receiver<Outcome>> {
        let mut entries = self.entries();
        if entries.contains_key(id) {
            return None;
        }
        let (slot, rx) = oneshot::channel();
        entries.insert(
            id.to_owned(),
            PendingRequest {
                slot,
                created_at: Instant::now(),
            },
        );
        Some(rx)
    }

    /// Resolve and remove `id`. Hands `outcome` back if no such entry exists.
    pub(crate) fn resolve(&self, id: &str, outcome: Outcome) -> Result<(), Outcome> {
        let Some(pending) = self.entries().remove(id) else {
            return Err(outcome);
        };
        tracing::trace!(
            id,
            waited_ms = pending.created_at.elapsed().as_millis() as u64,
            "request resolved"
        );
        if pending.slot.send(outcome).is_err() {
            tracing::debug!(id, "caller went away before its response arrived");
        }
        Ok(())
    }

    /// Remove `id` without resolving it.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    /// Resolve every outstanding entry with an error built by `error`.
    /// Returns how many entries were failed.
    pub(crate) fn fail_all(&self, error: impl Fn() -> ConnectionError) -> usize {
        let drained: Vec<PendingRequest> = self.entries().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.slot.send(Err(error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let table = PendingTable::default();
        assert!(table.register("a").is_some());
        assert!(table.register("a").is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let table = PendingTable::default();
        let rx = table.register("a");
        assert!(table.resolve("a", Ok(serde_json::json!(1))).is_ok());
        let second = table.resolve("a", Ok(serde_json::json!(2)));
        assert!(matches!(second, Err(Ok(v)) if v == serde_json::json!(2)));
        let outcome = match rx {
            Some(rx) => rx.await,
            None => panic!("registration failed"),
        };
        assert!(matches!(outcome, Ok(Ok(v)) if v == serde_json::json!(1)));
        assert!(!table.contains("a"));
    }

    #[tokio::test]
    async fn fail_all_resolves_everyone() {
        let table = PendingTable::default();
        let a = table.register("a");
        let b = table.register("b");
        assert_eq!(table.fail_all(|| ConnectionError::Disconnected), 2);
        assert_eq!(table.len(), 0);
        for rx in [a, b].into_iter().flatten() {
            assert!(matches!(rx.await, Ok(Err(ConnectionError::Disconnected))));
        }
    }

    #[test]
    fn remove_drops_without_resolving() {
        let table = PendingTable::default();
        let _rx = table.register("a");
        assert!(table.remove("a"));
        assert!(!table.remove("a"));
    }
}
