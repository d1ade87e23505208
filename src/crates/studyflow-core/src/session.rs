//! Process-wide session registry
//!
//! One [`SessionSlot`] per live thread holds the in-memory side state that
//! does not belong in the checkpoint:
//!
//! - the session correlation id (rehydrated from the checkpoint after a restart)
//! - a cancellation flag raised when the thread is deleted
//! - the run lock serializing `process` calls for the thread
//! - the edit audit trail of the thread's document edits
//!
//! Slots are created on first use and torn down on deletion or completion.
//! Removing a slot cancels it, so a call that was queued on the old run
//! lock notices and re-fetches a fresh slot.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Record of one applied document edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditAudit {
    pub stage: String,
    pub old_text: String,
    pub new_text: String,
    /// Text that was actually replaced
    pub matched: String,
    pub distance: usize,
    pub similarity: f64,
    pub at: DateTime<Utc>,
}

/// In-memory side state of one thread.
#[derive(Debug, Default)]
pub struct SessionSlot {
    session_id: RwLock<Option<String>>,
    cancelled: AtomicBool,
    run_lock: Arc<AsyncMutex<()>>,
    audit: Mutex<Vec<EditAudit>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn bind_session(&self, session_id: impl Into<String>) {
        *self.session_id.write() = Some(session_id.into());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for exclusive use of the thread.
    pub async fn lock_run(&self) -> OwnedMutexGuard<()> {
        self.run_lock.clone().lock_owned().await
    }

    pub fn record_edit(&self, audit: EditAudit) {
        self.audit.lock().push(audit);
    }

    pub fn edits(&self) -> Vec<EditAudit> {
        self.audit.lock().clone()
    }
}

/// Map of thread id to [`SessionSlot`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `thread_id`, created on first use.
    pub fn slot(&self, thread_id: &str) -> Arc<SessionSlot> {
        self.slots
            .lock()
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .clone()
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.lock().get(thread_id).cloned()
    }

    /// Tear down the slot and cancel any in-flight work. Idempotent.
    pub fn remove(&self, thread_id: &str) -> bool {
        match self.slots.lock().remove(thread_id) {
            Some(slot) => {
                slot.cancel();
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove), but only if `thread_id` still maps to
    /// `slot`. A slot created after `slot` was torn down is left alone.
    pub fn remove_if(&self, thread_id: &str, slot: &Arc<SessionSlot>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(thread_id) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                slots.remove(thread_id);
                slot.cancel();
                true
            }
            _ => false,
        }
    }

    /// Edit audit of `thread_id`; empty when the thread has no slot.
    pub fn edits(&self, thread_id: &str) -> Vec<EditAudit> {
        self.get(thread_id).map(|s| s.edits()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit(stage: &str) -> EditAudit {
        EditAudit {
            stage: stage.to_string(),
            old_text: "old".into(),
            new_text: "new".into(),
            matched: "old".into(),
            distance: 0,
            similarity: 1.0,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_slot_created_once() {
        let registry = SessionRegistry::new();
        let a = registry.slot("t-1");
        let b = registry.slot("t-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_cancels_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("t-1");
        slot.bind_session("s-1");
        slot.record_edit(audit("edit_document"));

        assert!(registry.remove("t-1"));
        assert!(slot.is_cancelled());
        assert!(!registry.remove("t-1"));
        assert!(registry.edits("t-1").is_empty());

        let fresh = registry.slot("t-1");
        assert!(!fresh.is_cancelled());
        assert_eq!(fresh.session_id(), None);
    }

    #[test]
    fn test_remove_if_spares_newer_slot() {
        let registry = SessionRegistry::new();
        let stale = registry.slot("t-1");
        registry.remove("t-1");
        let fresh = registry.slot("t-1");
        fresh.bind_session("s-2");

        assert!(!registry.remove_if("t-1", &stale));
        assert!(!fresh.is_cancelled());
        assert_eq!(registry.edits("t-1").len(), 0);
        assert_eq!(registry.get("t-1").and_then(|s| s.session_id()), Some("s-2".to_string()));

        assert!(registry.remove_if("t-1", &fresh));
        assert!(fresh.is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_run_lock_is_exclusive() {
        let slot = Arc::new(SessionSlot::new());
        let guard = slot.lock_run().await;

        let contender = slot.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock_run().await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
