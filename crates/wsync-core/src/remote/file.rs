//! Directory-backed workspace service.
//!
//! Each workspace lives in `<dir>/<encoded id>.wsync-workspace.json`.
//! Writes go to a per-writer temp file in the same directory and are
//! renamed into place, so a crashed save never leaves a truncated record
//! behind and concurrent writers never share a temp file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tracing::{debug, warn};

use super::{ServiceFuture, WorkspaceListing, WorkspaceRecord, WorkspaceService};
use crate::error::{FetchError, SaveError};

const SUFFIX: &str = ".wsync-workspace.json";

/// Characters left unescaped in file names.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Workspace store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileWorkspaceService {
    dir: PathBuf,
}

impl FileWorkspaceService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{SUFFIX}", utf8_percent_encode(id, FILE_NAME)))
    }

    /// Unique per write; never matches `SUFFIX`, so listings skip it.
    fn temp_path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}{SUFFIX}.{}-{:016x}.tmp",
            utf8_percent_encode(id, FILE_NAME),
            std::process::id(),
            rand::random::<u64>()
        ))
    }

    async fn read_record(path: &Path, id: &str) -> Result<WorkspaceRecord, FetchError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                FetchError::NotFound(id.to_string())
            } else {
                FetchError::Unreachable(format!("{}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&text).map_err(|e| FetchError::Decode(format!("{}: {e}", path.display())))
    }

    async fn write_record(&self, id: &str, mut record: WorkspaceRecord) -> Result<(), SaveError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SaveError::Remote(format!("{}: {e}", self.dir.display())))?;

        let path = self.path_for(id);
        let now = chrono::Utc::now().to_rfc3339();
        let created = match Self::read_record(&path, id).await {
            Ok(existing) => existing.metadata.created,
            Err(_) => None,
        };
        record.id = id.to_string();
        record.metadata.id = id.to_string();
        record.metadata.created = created.or_else(|| Some(now.clone()));
        record.metadata.last_modified = Some(now);

        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| SaveError::Remote(format!("encode {id:?}: {e}")))?;
        let tmp = self.temp_path_for(id);
        if let Err(e) = tokio::fs::write(&tmp, body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SaveError::Remote(format!("{}: {e}", tmp.display())));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SaveError::Remote(format!("{}: {e}", path.display())));
        }
        debug!(workspace = id, path = %path.display(), "workspace written");
        Ok(())
    }

    async fn list_records(&self) -> Result<WorkspaceListing, FetchError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(WorkspaceListing::default()),
            Err(e) => {
                return Err(FetchError::Unreachable(format!(
                    "{}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(SUFFIX)) else {
                continue;
            };
            let Ok(id) = percent_decode_str(stem).decode_utf8() else {
                continue;
            };
            match Self::read_record(&entry.path(), &id).await {
                Ok(record) => records.push(record),
                Err(err) => warn!(file = %entry.path().display(), error = %err, "skipping workspace file"),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(WorkspaceListing {
            ids: records.iter().map(|r| r.id.clone()).collect(),
            values: records,
        })
    }
}

impl WorkspaceService for FileWorkspaceService {
    fn fetch<'a>(&'a self, id: &'a str) -> ServiceFuture<'a, WorkspaceRecord, FetchError> {
        Box::pin(async move { Self::read_record(&self.path_for(id), id).await })
    }

    fn save<'a>(&'a self, id: &'a str, record: WorkspaceRecord) -> ServiceFuture<'a, (), SaveError> {
        Box::pin(self.write_record(id, record))
    }

    fn list(&self) -> ServiceFuture<'_, WorkspaceListing, FetchError> {
        Box::pin(self.list_records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_fetch_stamps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path());
        service
            .save("proj1", WorkspaceRecord::new("proj1", json!({"k": 1})))
            .await
            .unwrap();

        let record = service.fetch("proj1").await.unwrap();
        assert_eq!(record.data, json!({"k": 1}));
        assert_eq!(record.metadata.id, "proj1");
        assert!(record.metadata.created.is_some());
        assert!(record.metadata.last_modified.is_some());
    }

    #[tokio::test]
    async fn resave_keeps_created_time() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path());
        service
            .save("a", WorkspaceRecord::new("a", json!({})))
            .await
            .unwrap();
        let first = service.fetch("a").await.unwrap().metadata.created;
        service
            .save("a", WorkspaceRecord::new("a", json!({"v": 2})))
            .await
            .unwrap();
        let second = service.fetch("a").await.unwrap();
        assert_eq!(second.metadata.created, first);
        assert_eq!(second.data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_id_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = (0..8)
            .map(|n| {
                let service = FileWorkspaceService::new(dir.path());
                tokio::spawn(async move {
                    service
                        .save("shared", WorkspaceRecord::new("shared", json!({"n": n})))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let service = FileWorkspaceService::new(dir.path());
        assert!(service.fetch("shared").await.unwrap().data["n"].is_number());
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("shared{SUFFIX}")]);
    }

    #[tokio::test]
    async fn missing_workspace_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path());
        assert!(matches!(
            service.fetch("absent").await,
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ids_with_path_characters_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path());
        service
            .save("../escape/me", WorkspaceRecord::new("x", json!({})))
            .await
            .unwrap();
        let listing = service.list().await.unwrap();
        assert_eq!(listing.ids, vec!["../escape/me"]);
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn list_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path().join("not-yet"));
        assert!(service.list().await.unwrap().ids.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_decode_error_and_skipped_in_list() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileWorkspaceService::new(dir.path());
        std::fs::write(dir.path().join(format!("bad{SUFFIX}")), "{").unwrap();
        assert!(matches!(
            service.fetch("bad").await,
            Err(FetchError::Decode(_))
        ));
        assert!(service.list().await.unwrap().ids.is_empty());
    }
}
