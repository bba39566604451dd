//! Key-value storage capability shared by every window of one origin.
//!
//! Mirrors browser local storage semantics: string keys and values, a
//! fallible `clear`, and change events delivered to every handle *except*
//! the one that made the change.
//!
//! ```text
//! MemoryStorage (shared area)
//!   ├── handle() → window A ──set("k")──► event to B, C
//!   ├── handle() → window B
//!   └── handle() → window C
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::StorageClearError;

const EVENT_CAPACITY: usize = 256;

/// One change to the shared storage area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key; `None` when the whole area was cleared.
    pub key: Option<String>,
    /// Value after the change; `None` on removal or clear.
    pub new_value: Option<String>,
    /// Handle that made the change.
    origin: u64,
}

/// Stream of storage events made by *other* handles.
#[derive(Debug)]
pub struct StorageEvents {
    origin: u64,
    rx: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    /// Next foreign event, or `None` once the storage area is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => {}
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "storage event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Low-level key-value storage: get/set/clear by key plus change notification.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    /// All keys currently stored, in sorted order.
    fn keys(&self) -> Vec<String>;

    /// Remove every key in the area.
    fn clear(&self) -> Result<(), StorageClearError>;

    /// Subscribe to changes made through other handles.
    fn subscribe(&self) -> StorageEvents;
}

#[derive(Debug)]
struct Area {
    entries: Mutex<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    next_origin: AtomicU64,
}

/// In-process storage area; each [`MemoryStorage::handle`] acts as one window.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    area: Arc<Area>,
    origin: u64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a fresh, empty area and a first handle onto it.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            area: Arc::new(Area {
                entries: Mutex::new(BTreeMap::new()),
                events,
                next_origin: AtomicU64::new(1),
            }),
            origin: 0,
        }
    }

    /// Another handle onto the same area, with its own event origin.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            origin: self.area.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn emit(&self, key: Option<&str>, new_value: Option<&str>) {
        // No receivers is fine.
        let _ = self.area.events.send(StorageEvent {
            key: key.map(str::to_string),
            new_value: new_value.map(str::to_string),
            origin: self.origin,
        });
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.area
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.area
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.emit(Some(key), Some(value));
    }

    fn remove(&self, key: &str) {
        let removed = self
            .area
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            self.emit(Some(key), None);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.area
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn clear(&self) -> Result<(), StorageClearError> {
        self.area
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.emit(None, None);
        Ok(())
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            origin: self.origin,
            rx: self.area.events.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_entries() {
        let a = MemoryStorage::new();
        let b = a.handle();
        a.set("k", "v");
        assert_eq!(b.get("k").as_deref(), Some("v"));
        b.remove("k");
        assert!(a.get("k").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let s = MemoryStorage::new();
        s.set("b", "1");
        s.set("a", "2");
        assert_eq!(s.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn events_skip_own_origin() {
        let a = MemoryStorage::new();
        let b = a.handle();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.set("from-a", "1");
        b.set("from-b", "2");

        let seen_by_b = b_events.recv().await.unwrap();
        assert_eq!(seen_by_b.key.as_deref(), Some("from-a"));
        let seen_by_a = a_events.recv().await.unwrap();
        assert_eq!(seen_by_a.key.as_deref(), Some("from-b"));
        assert_eq!(seen_by_a.new_value.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn clear_emits_keyless_event() {
        let a = MemoryStorage::new();
        let b = a.handle();
        let mut events = b.subscribe();
        a.set("k", "v");
        a.clear().unwrap();
        assert_eq!(events.recv().await.unwrap().key.as_deref(), Some("k"));
        let cleared = events.recv().await.unwrap();
        assert!(cleared.key.is_none());
        assert!(b.keys().is_empty());
    }

    #[test]
    fn removing_missing_key_is_silent() {
        let a = MemoryStorage::new();
        let mut events = a.handle().subscribe();
        a.remove("missing");
        assert!(events.rx.try_recv().is_err());
    }
}
