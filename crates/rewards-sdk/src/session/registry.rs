//! Reference-counted identity listener registry
//!
//! One upstream subscription to the provider's auth events is fanned out to
//! any number of listeners. The upstream task starts with the first listener
//! and stops when the last handle is dropped.

use super::Identity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;

/// Callback invoked with the new identity (`None` after sign-out)
pub type IdentityCallback = Arc<dyn Fn(Option<&Identity>) + Send + Sync>;

pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<u64, IdentityCallback>>,
    next_id: AtomicU64,
    upstream: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            upstream: Mutex::new(None),
        }
    }

    /// Register a listener; `start_upstream` runs only for the first one
    pub(crate) fn add(
        self: &Arc<Self>,
        callback: IdentityCallback,
        start_upstream: impl FnOnce() -> JoinHandle<()>,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let first = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.insert(id, callback);
            listeners.len() == 1
        };

        if first {
            let mut upstream = self.upstream.lock().unwrap_or_else(|e| e.into_inner());
            if upstream.is_none() {
                *upstream = Some(start_upstream());
            }
        }

        ListenerHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        let empty = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.remove(&id);
            listeners.is_empty()
        };

        if empty {
            let mut upstream = self.upstream.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(task) = upstream.take() {
                task.abort();
            }
        }
    }

    /// Invoke every listener outside the lock
    pub(crate) fn notify(&self, identity: Option<&Identity>) {
        let callbacks: Vec<IdentityCallback> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.values().cloned().collect()
        };
        for callback in callbacks {
            callback(identity);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn upstream_active(&self) -> bool {
        self.upstream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Keeps a listener registered; dropping it unregisters
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
