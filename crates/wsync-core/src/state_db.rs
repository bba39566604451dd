//! Namespaced local state store gated on the initial transform directive.
//!
//! Every operation first waits for the [`TransformGate`]; the directive is
//! applied exactly once, silently, before the first operation proceeds.
//! After that point operations complete without suspending.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, broadcast};
use tracing::{debug, warn};

use crate::storage::KeyValueStorage;
use crate::transform::{TransformDirective, TransformGate};

const CHANGE_CAPACITY: usize = 256;

/// What kind of mutation produced a [`StateChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Save,
    Remove,
    Clear,
}

/// Change notification emitted by non-silent mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Key that changed; empty for [`ChangeKind::Clear`].
    pub id: String,
    pub kind: ChangeKind,
}

/// Key/value state scoped to one namespace of a [`KeyValueStorage`].
pub struct StateDb {
    namespace: String,
    storage: Arc<dyn KeyValueStorage>,
    gate: TransformGate,
    applied: OnceCell<()>,
    changed: broadcast::Sender<StateChange>,
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb")
            .field("namespace", &self.namespace)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl StateDb {
    pub fn new(
        namespace: impl Into<String>,
        storage: Arc<dyn KeyValueStorage>,
        gate: TransformGate,
    ) -> Self {
        let (changed, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            namespace: namespace.into(),
            storage,
            gate,
            applied: OnceCell::new(),
            changed,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// True once the gate's directive has been applied.
    pub fn is_ready(&self) -> bool {
        self.applied.initialized()
    }

    /// Subscribe to non-silent mutations.
    pub fn changed(&self) -> broadcast::Receiver<StateChange> {
        self.changed.subscribe()
    }

    /// Wait until the directive has been applied.
    pub async fn ready(&self) {
        self.applied
            .get_or_init(|| async {
                let directive = self.gate.wait().await;
                self.apply(directive);
            })
            .await;
    }

    pub async fn fetch(&self, id: &str) -> Option<Value> {
        self.ready().await;
        self.read_key(&self.storage_key(id))
    }

    pub async fn save(&self, id: &str, value: Value) {
        self.ready().await;
        self.storage.set(&self.storage_key(id), &value.to_string());
        self.emit(id, ChangeKind::Save);
    }

    pub async fn remove(&self, id: &str) {
        self.ready().await;
        self.storage.remove(&self.storage_key(id));
        self.emit(id, ChangeKind::Remove);
    }

    /// Entries whose id starts with `prefix`, sorted by id.
    pub async fn list(&self, prefix: &str) -> Vec<(String, Value)> {
        self.ready().await;
        self.entries()
            .into_iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .collect()
    }

    /// Remove every key in this namespace.
    ///
    /// `silent` suppresses the change notification so internal recovery
    /// does not re-trigger a save.
    pub async fn clear(&self, silent: bool) {
        self.ready().await;
        self.clear_namespace();
        if !silent {
            self.emit("", ChangeKind::Clear);
        }
    }

    /// Snapshot of the namespace as a JSON object.
    pub async fn to_json(&self) -> Map<String, Value> {
        self.ready().await;
        self.entries().into_iter().collect()
    }

    fn storage_key(&self, id: &str) -> String {
        format!("{}:{id}", self.namespace)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    fn read_key(&self, key: &str) -> Option<Value> {
        let raw = self.storage.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "skipping undecodable state entry");
                None
            }
        }
    }

    fn entries(&self) -> Vec<(String, Value)> {
        let prefix = self.prefix();
        self.storage
            .keys()
            .into_iter()
            .filter_map(|key| {
                let id = key.strip_prefix(&prefix)?.to_string();
                let value = self.read_key(&key)?;
                Some((id, value))
            })
            .collect()
    }

    fn clear_namespace(&self) {
        let prefix = self.prefix();
        for key in self.storage.keys() {
            if key.starts_with(&prefix) {
                self.storage.remove(&key);
            }
        }
    }

    fn apply(&self, directive: TransformDirective) {
        debug!(namespace = %self.namespace, directive = %directive.kind(), "applying transform");
        match directive {
            TransformDirective::Cancel => {}
            TransformDirective::Clear => self.clear_namespace(),
            TransformDirective::Overwrite(contents) => {
                self.clear_namespace();
                match contents {
                    Value::Object(map) => {
                        for (id, value) in map {
                            self.storage.set(&self.storage_key(&id), &value.to_string());
                        }
                    }
                    Value::Null => {}
                    other => warn!(
                        kind = json_kind(&other),
                        "overwrite contents are not an object; starting empty"
                    ),
                }
            }
        }
    }

    fn emit(&self, id: &str, kind: ChangeKind) {
        // No subscribers before the save listener attaches.
        let _ = self.changed.send(StateChange {
            id: id.to_string(),
            kind,
        });
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
