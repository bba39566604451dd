//! Deferred transform gate.
//!
//! The local state store cannot serve reads until the orchestrator has
//! decided how fetched remote data reconciles with local state. That
//! decision is a single [`TransformDirective`], supplied once through a
//! [`TransformGate`]; every waiter observes the same directive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// One-time instruction for reconciling fetched data with local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "contents", rename_all = "snake_case")]
pub enum TransformDirective {
    /// Replace local state wholesale with the fetched contents.
    Overwrite(Value),
    /// Keep local state as canonical.
    Cancel,
    /// Discard all local state.
    Clear,
}

impl TransformDirective {
    #[must_use]
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::Overwrite(_) => DirectiveKind::Overwrite,
            Self::Cancel => DirectiveKind::Cancel,
            Self::Clear => DirectiveKind::Clear,
        }
    }
}

/// Directive tag without its payload, for logging and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Overwrite,
    Cancel,
    Clear,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::Cancel => "cancel",
            Self::Clear => "clear",
        })
    }
}

/// Returned when a directive is supplied to an already-resolved gate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("transform gate already resolved with {existing}")]
pub struct GateAlreadySupplied {
    pub existing: DirectiveKind,
}

/// Single-assignment future of a [`TransformDirective`].
///
/// Cheap to clone; all clones share one slot. Callers own the decision of
/// *whether* to supply; a late `supply` never replaces the first directive.
#[derive(Debug, Clone)]
pub struct TransformGate {
    slot: Arc<watch::Sender<Option<TransformDirective>>>,
}

impl Default for TransformGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformGate {
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Resolve the gate. The first directive wins.
    pub fn supply(&self, directive: TransformDirective) -> Result<(), GateAlreadySupplied> {
        let mut existing = None;
        self.slot.send_if_modified(|slot| match slot {
            Some(current) => {
                existing = Some(current.kind());
                false
            }
            None => {
                *slot = Some(directive);
                true
            }
        });
        match existing {
            Some(existing) => Err(GateAlreadySupplied { existing }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_supplied(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The directive, if already supplied.
    #[must_use]
    pub fn peek(&self) -> Option<TransformDirective> {
        self.slot.borrow().clone()
    }

    /// Suspend until the gate is supplied.
    pub async fn wait(&self) -> TransformDirective {
        let mut rx = self.slot.subscribe();
        loop {
            if let Some(directive) = rx.borrow_and_update().clone() {
                return directive;
            }
            // `self` keeps the sender alive, so this only fails if the
            // runtime is tearing down.
            if rx.changed().await.is_err() {
                return TransformDirective::Cancel;
            }
        }
    }
}
