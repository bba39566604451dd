//! Debounced, conflated workspace saves.
//!
//! At most one conflation token exists at a time. Every `request_save`
//! issued while a token is pending shares it, and every caller sees the
//! same outcome. Writes are serialized, so at most one remote write is in
//! flight.
//!
//! ```text
//!            request_save            timer fires (arm matches)
//!   Idle ─────────────────► Pending ─────────────────────────► Firing
//!    ▲                       │  ▲                                │
//!    │                       └──┘ request_save: rearm timer      │
//!    └───────────────────── outcome broadcast ◄──────────────────┘
//! ```
//!
//! A request made while a write is firing starts a new token; its write
//! waits for the in-flight one to settle.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::SaveError;
use crate::page_config::WindowIdentity;
use crate::remote::{WorkspaceRecord, WorkspaceService};
use crate::state_db::StateDb;

type Outcome = Option<Result<(), SaveError>>;

/// Observable phase of the save pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePhase {
    Idle,
    Pending,
    Firing,
}

struct Pending {
    generation: u64,
    /// Identifies the currently armed timer; stale timers see a mismatch.
    arm: u64,
    outcome: watch::Sender<Outcome>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SaveState {
    next_generation: u64,
    next_arm: u64,
    pending: Option<Pending>,
    firing: usize,
}

struct Inner {
    store: Arc<StateDb>,
    service: Arc<dyn WorkspaceService>,
    workspace: WindowIdentity,
    debounce: Duration,
    state: Mutex<SaveState>,
    write_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Save pipeline for one window identity.
#[derive(Clone)]
pub struct SaveCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SaveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCoordinator")
            .field("workspace", &self.inner.workspace)
            .field("debounce", &self.inner.debounce)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SaveCoordinator {
    pub fn new(
        store: Arc<StateDb>,
        service: Arc<dyn WorkspaceService>,
        workspace: WindowIdentity,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                service,
                workspace,
                debounce,
                state: Mutex::new(SaveState::default()),
                write_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn workspace(&self) -> &WindowIdentity {
        &self.inner.workspace
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    pub fn phase(&self) -> SavePhase {
        let state = self.inner.lock_state();
        if state.pending.is_some() {
            SavePhase::Pending
        } else if state.firing > 0 {
            SavePhase::Firing
        } else {
            SavePhase::Idle
        }
    }

    /// Schedule a save and return a future of its shared outcome.
    ///
    /// The timer is armed before this returns; dropping the future does
    /// not cancel the save. `immediate` collapses the debounce to zero but
    /// still joins a pending token.
    pub fn request_save(
        &self,
        immediate: bool,
    ) -> impl Future<Output = Result<(), SaveError>> + Send + 'static {
        let delay = if immediate {
            Duration::ZERO
        } else {
            self.inner.debounce
        };

        let rx = {
            let mut state = self.inner.lock_state();
            let arm = state.next_arm;
            state.next_arm += 1;

            let mut pending = match state.pending.take() {
                Some(mut pending) => {
                    if let Some(timer) = pending.timer.take() {
                        timer.abort();
                    }
                    pending
                }
                None => {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    let (outcome, _) = watch::channel(None);
                    trace!(generation, "save token created");
                    Pending {
                        generation,
                        arm,
                        outcome,
                        timer: None,
                    }
                }
            };
            pending.arm = arm;
            let rx = pending.outcome.subscribe();
            let inner = Arc::clone(&self.inner);
            pending.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.fire(arm).await;
            }));
            trace!(
                generation = pending.generation,
                delay_ms = delay.as_millis() as u64,
                "save timer armed"
            );
            state.pending = Some(pending);
            rx
        };

        wait_outcome(rx)
    }

    /// Attach the store's change stream to this coordinator.
    ///
    /// Only the first call subscribes; later calls return `false`.
    pub fn watch_changes(&self) -> bool {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return false;
        }

        let mut changes = self.inner.store.changed();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let Some(inner) = weak.upgrade() else { break };
                // Outcome is logged by the firing task.
                drop(SaveCoordinator { inner }.request_save(false));
            }
        }));
        debug!(workspace = %self.inner.workspace, "save listener attached");
        true
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SaveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fire(&self, arm: u64) {
        let pending = {
            let mut state = self.lock_state();
            match &state.pending {
                Some(pending) if pending.arm == arm => {}
                _ => {
                    trace!(arm, "stale save timer ignored");
                    return;
                }
            }
            state.firing += 1;
            state.pending.take()
        };
        let Some(pending) = pending else { return };

        let result = {
            let _write = self.write_lock.lock().await;
            let snapshot = self.store.to_json().await;
            let id = self.workspace.as_str();
            let record = WorkspaceRecord::new(id, Value::Object(snapshot));
            self.service.save(id, record).await
        };

        match &result {
            Ok(()) => debug!(
                workspace = %self.workspace,
                generation = pending.generation,
                "workspace saved"
            ),
            Err(err) => warn!(
                workspace = %self.workspace,
                generation = pending.generation,
                error = %err,
                "workspace save failed"
            ),
        }
        pending.outcome.send_replace(Some(result));
        self.lock_state().firing -= 1;
    }
}

async fn wait_outcome(mut rx: watch::Receiver<Outcome>) -> Result<(), SaveError> {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(SaveError::Abandoned);
        }
    }
}
