//! Remote workspace service boundary.
//!
//! The session needs exactly three operations from the remote store:
//! fetch by id, save by id, and list. Implementations:
//!
//! - [`MemoryWorkspaceService`]: in-process map
//! - [`file::FileWorkspaceService`]: one JSON file per workspace
//! - [`http::HttpWorkspaceService`]: REST client

pub mod file;
pub mod http;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FetchError, SaveError};

pub use file::FileWorkspaceService;
pub use http::HttpWorkspaceService;

/// Future returned by [`WorkspaceService`] operations.
pub type ServiceFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Metadata stored alongside workspace data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub id: String,
    /// RFC 3339 creation time, stamped by services that track it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// RFC 3339 time of the last save, stamped by services that track it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// The unit exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    /// Services that omit the top-level id get it filled from the request.
    #[serde(default)]
    pub id: String,
    /// Opaque state blob (a JSON object of state keys in practice).
    pub data: Value,
    pub metadata: WorkspaceMetadata,
}

impl WorkspaceRecord {
    /// Record for `id` with bare `{ id }` metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        let id = id.into();
        Self {
            metadata: WorkspaceMetadata {
                id: id.clone(),
                ..WorkspaceMetadata::default()
            },
            id,
            data,
        }
    }
}

/// Result of [`WorkspaceService::list`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceListing {
    /// Workspace ids, sorted.
    pub ids: Vec<String>,
    /// Records in the same order as `ids`.
    pub values: Vec<WorkspaceRecord>,
}

/// Remote workspace store.
pub trait WorkspaceService: Send + Sync {
    fn fetch<'a>(&'a self, id: &'a str) -> ServiceFuture<'a, WorkspaceRecord, FetchError>;

    fn save<'a>(&'a self, id: &'a str, record: WorkspaceRecord) -> ServiceFuture<'a, (), SaveError>;

    fn list(&self) -> ServiceFuture<'_, WorkspaceListing, FetchError>;
}

/// In-process workspace store. Keeps a history of every save it accepted.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceService {
    records: Mutex<BTreeMap<String, WorkspaceRecord>>,
    history: Mutex<Vec<WorkspaceRecord>>,
}

impl MemoryWorkspaceService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record without recording it as a save.
    pub fn insert(&self, record: WorkspaceRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    /// Current record for `id`, if any.
    pub fn get(&self, id: &str) -> Option<WorkspaceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every record accepted by `save`, oldest first.
    pub fn save_history(&self) -> Vec<WorkspaceRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl WorkspaceService for MemoryWorkspaceService {
    fn fetch<'a>(&'a self, id: &'a str) -> ServiceFuture<'a, WorkspaceRecord, FetchError> {
        Box::pin(async move { self.get(id).ok_or_else(|| FetchError::NotFound(id.to_string())) })
    }

    fn save<'a>(&'a self, id: &'a str, record: WorkspaceRecord) -> ServiceFuture<'a, (), SaveError> {
        Box::pin(async move {
            let mut record = record;
            record.id = id.to_string();
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
            self.insert(record);
            Ok(())
        })
    }

    fn list(&self) -> ServiceFuture<'_, WorkspaceListing, FetchError> {
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(WorkspaceListing {
                ids: records.keys().cloned().collect(),
                values: records.values().cloned().collect(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serializes_with_metadata_id() {
        let record = WorkspaceRecord::new("proj1", json!({"k": 1}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": "proj1", "data": {"k": 1}, "metadata": {"id": "proj1"}})
        );
    }

    #[tokio::test]
    async fn memory_service_fetch_missing_is_not_found() {
        let service = MemoryWorkspaceService::new();
        assert_eq!(
            service.fetch("nope").await.unwrap_err(),
            FetchError::NotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn memory_service_save_records_history() {
        let service = MemoryWorkspaceService::new();
        service
            .save("a", WorkspaceRecord::new("a", json!({"v": 1})))
            .await
            .unwrap();
        service
            .save("a", WorkspaceRecord::new("a", json!({"v": 2})))
            .await
            .unwrap();
        assert_eq!(service.save_count(), 2);
        assert_eq!(service.fetch("a").await.unwrap().data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn memory_service_list_is_sorted() {
        let service = MemoryWorkspaceService::new();
        service.insert(WorkspaceRecord::new("b", json!({})));
        service.insert(WorkspaceRecord::new("a", json!({})));
        let listing = service.list().await.unwrap();
        assert_eq!(listing.ids, vec!["a", "b"]);
        assert_eq!(listing.values[0].id, "a");
    }
}
