//! Load, clone and reset commands driven by URL routing.
//!
//! The orchestrator owns the `resolved` guard: it is the only caller of
//! [`TransformGate::supply`], and it supplies at most once.
//!
//! ```text
//!   route /lab/workspaces/b?clone=a
//!     rank 20  wsync:reset-on-load   (no reset flag → continue)
//!     rank 30  wsync:load-state
//!                fetch "a" ─ok──► overwrite(a.data)
//!                          └err─► cancel
//!                attach save listener
//!                save "b" immediately, strip clone, navigate silently → stop
//! ```
//!
//! Phases move one way: `Unresolved → Resolving → Resolved`.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, RouteError, SaveError};
use crate::page_config::{PageConfig, WindowIdentity};
use crate::remote::WorkspaceService;
use crate::route::{
    CommandArgs, CommandExecutor, CommandFuture, CommandOutcome, NavigateOptions, RouteLocation,
    RouteRegistration, Router,
};
use crate::save::SaveCoordinator;
use crate::splash::{RecoveryCommand, RecoveryFuture, SplashScreen};
use crate::state_db::StateDb;
use crate::storage::KeyValueStorage;
use crate::transform::{DirectiveKind, TransformDirective, TransformGate};

pub const LOAD_STATE: &str = "wsync:load-state";
pub const SAVE_STATE: &str = "wsync:save-state";
pub const RECOVER_STATE: &str = "wsync:recover-state";
pub const RESET: &str = "wsync:reset";
pub const RESET_ON_LOAD: &str = "wsync:reset-on-load";

/// Catch-all pattern for load-state.
pub const LOAD_PATTERN: &str = ".?";
pub const LOAD_RANK: u32 = 30;
/// Matches a bare `reset` query flag anywhere in the search string.
pub const RESET_PATTERN: &str = r"(\?reset|&reset)($|&)";
pub const RESET_RANK: u32 = 20;

const CLONE_PARAM: &str = "clone";
const RESET_PARAM: &str = "reset";

/// Every command id the orchestrator answers to.
pub const COMMANDS: [&str; 5] = [LOAD_STATE, SAVE_STATE, RECOVER_STATE, RESET, RESET_ON_LOAD];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Unresolved,
    Resolving,
    Resolved,
}

#[derive(Debug)]
struct OrchestratorState {
    phase: LoadPhase,
    resolved: bool,
}

/// Collaborators wired into a [`StateOrchestrator`].
pub struct OrchestratorParts {
    pub page: Arc<PageConfig>,
    pub store: Arc<StateDb>,
    pub gate: TransformGate,
    pub storage: Arc<dyn KeyValueStorage>,
    pub service: Arc<dyn WorkspaceService>,
    pub saves: SaveCoordinator,
    pub router: Arc<dyn Router>,
    pub splash: SplashScreen,
}

pub struct StateOrchestrator {
    page: Arc<PageConfig>,
    store: Arc<StateDb>,
    gate: TransformGate,
    storage: Arc<dyn KeyValueStorage>,
    service: Arc<dyn WorkspaceService>,
    saves: SaveCoordinator,
    router: Arc<dyn Router>,
    splash: SplashScreen,
    state: Mutex<OrchestratorState>,
}

impl std::fmt::Debug for StateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateOrchestrator")
            .field("workspace", self.saves.workspace())
            .field("phase", &self.phase())
            .field("directive", &self.directive())
            .finish_non_exhaustive()
    }
}

impl StateOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            page: parts.page,
            store: parts.store,
            gate: parts.gate,
            storage: parts.storage,
            service: parts.service,
            saves: parts.saves,
            router: parts.router,
            splash: parts.splash,
            state: Mutex::new(OrchestratorState {
                phase: LoadPhase::Unresolved,
                resolved: false,
            }),
        }
    }

    /// Register load-state and reset-on-load with the router.
    pub fn register_routes(&self) -> Result<(), RouteError> {
        self.router
            .register(RouteRegistration::new(LOAD_STATE, LOAD_PATTERN, LOAD_RANK)?);
        self.router
            .register(RouteRegistration::new(RESET_ON_LOAD, RESET_PATTERN, RESET_RANK)?);
        Ok(())
    }

    pub fn workspace(&self) -> &WindowIdentity {
        self.saves.workspace()
    }

    pub fn phase(&self) -> LoadPhase {
        self.lock().phase
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().resolved
    }

    /// Directive supplied to the gate, if any.
    pub fn directive(&self) -> Option<DirectiveKind> {
        self.gate.peek().map(|d| d.kind())
    }

    pub fn saves(&self) -> &SaveCoordinator {
        &self.saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the `resolved` guard and supply `directive`. Returns false if
    /// another command already resolved the session.
    fn resolve_once(&self, directive: TransformDirective) -> bool {
        {
            let mut state = self.lock();
            state.phase = LoadPhase::Resolved;
            if state.resolved {
                return false;
            }
            state.resolved = true;
        }
        let kind = directive.kind();
        if let Err(err) = self.gate.supply(directive) {
            warn!(error = %err, "transform gate was supplied outside the orchestrator");
            return false;
        }
        info!(workspace = %self.workspace(), directive = %kind, "transform resolved");
        true
    }

    fn location_or_current(&self, args: &CommandArgs) -> RouteLocation {
        args.location
            .clone()
            .unwrap_or_else(|| self.router.current())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Fetch the workspace (or clone source) and resolve the gate.
    pub async fn load_state(&self, location: &RouteLocation) -> crate::Result<CommandOutcome> {
        {
            let mut state = self.lock();
            if state.resolved {
                debug!(command = LOAD_STATE, "already resolved");
                return Ok(CommandOutcome::Continue);
            }
            state.phase = LoadPhase::Resolving;
        }

        let workspace = self.workspace().clone();
        let clone_source = location.param(CLONE_PARAM).map(|value| {
            if value.is_empty() {
                self.page.default_workspace()
            } else {
                value
            }
        });
        let source = clone_source
            .clone()
            .unwrap_or_else(|| workspace.as_str().to_string());

        let directive = match self.service.fetch(&source).await {
            Ok(record) => TransformDirective::Overwrite(record.data),
            Err(err) => {
                warn!(
                    command = LOAD_STATE,
                    source = %source,
                    error = %err,
                    "fetching workspace failed; keeping local state"
                );
                TransformDirective::Cancel
            }
        };
        if !self.resolve_once(directive) {
            debug!(command = LOAD_STATE, "resolved by recovery while fetching");
            return Ok(CommandOutcome::Continue);
        }

        if self.page.workspace().is_some() {
            self.saves.watch_changes();
        }

        // The session proceeds with whatever state it holds; a failed save
        // is retried by the next change.
        if clone_source.is_none() {
            if let Err(err) = self.saves.request_save(true).await {
                warn!(workspace = %workspace, error = %err, "saving loaded workspace failed");
            }
            return Ok(CommandOutcome::Continue);
        }

        info!(workspace = %workspace, source = %source, "cloning workspace");
        if let Err(err) = self.saves.request_save(true).await {
            warn!(workspace = %workspace, error = %err, "saving cloned workspace failed");
        }
        let url = location.without_param(CLONE_PARAM).request();
        self.router.navigate(
            &url,
            NavigateOptions {
                silent: true,
                hard: false,
            },
        )?;
        Ok(CommandOutcome::Stop)
    }

    /// Flush a save through the coordinator.
    pub async fn save_state(&self, immediate: bool) -> Result<(), SaveError> {
        self.saves.request_save(immediate).await
    }

    /// Clear local state, optionally all local storage, then save.
    ///
    /// A failed global clear degrades to a debounced save so the warning
    /// is visible before anything navigates away.
    ///
    /// Recovering before the load resolves claims the gate with `clear`,
    /// so a stalled fetch cannot hold recovery back.
    pub async fn recover_state(&self, global: bool) -> Result<(), SaveError> {
        if !self.is_resolved() && self.resolve_once(TransformDirective::Clear) {
            info!(workspace = %self.workspace(), "recovering before load resolved");
        }
        self.store.clear(true).await;
        let immediate = if global {
            match self.storage.clear() {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "clearing local storage failed; saving after debounce");
                    false
                }
            }
        } else {
            true
        };
        self.saves.request_save(immediate).await
    }

    /// Recover globally, ignore the outcome, and reload.
    pub async fn reset(&self) -> crate::Result<()> {
        if let Err(err) = self.recover_state(true).await {
            warn!(command = RESET, error = %err, "recovery failed; reloading anyway");
        }
        self.router.reload()?;
        Ok(())
    }

    /// Handle a `?reset` route.
    ///
    /// Once the gate is resolved it cannot be un-resolved, so a reset then
    /// needs a full reload and routing continues. Before that, the session
    /// resolves with `clear` and routing stops here.
    pub async fn reset_on_load(&self, location: &RouteLocation) -> crate::Result<CommandOutcome> {
        if !location.has_param(RESET_PARAM) {
            return Ok(CommandOutcome::Continue);
        }

        let store = Arc::clone(&self.store);
        let loading = self.splash.show(async move { store.ready().await });

        if self.is_resolved() {
            info!(command = RESET_ON_LOAD, "session already resolved; reloading");
            let reloaded = self.router.reload();
            loading.dispose();
            reloaded?;
            return Ok(CommandOutcome::Continue);
        }

        self.resolve_once(TransformDirective::Clear);
        if let Err(err) = self.recover_state(false).await {
            warn!(command = RESET_ON_LOAD, error = %err, "saving cleared state failed");
        }

        let url = location.without_param(RESET_PARAM).request();
        let navigated = self.router.navigate(
            &url,
            NavigateOptions {
                silent: true,
                hard: location.has_param(CLONE_PARAM),
            },
        );
        loading.dispose();
        navigated?;
        Ok(CommandOutcome::Stop)
    }

    async fn dispatch(&self, id: &str, args: CommandArgs) -> crate::Result<CommandOutcome> {
        debug!(command = id, "executing");
        match id {
            LOAD_STATE => {
                let location = self.location_or_current(&args);
                self.load_state(&location).await
            }
            SAVE_STATE => {
                self.save_state(args.immediate).await?;
                Ok(CommandOutcome::Continue)
            }
            RECOVER_STATE => {
                self.recover_state(args.global).await?;
                Ok(CommandOutcome::Continue)
            }
            RESET => {
                self.reset().await?;
                Ok(CommandOutcome::Continue)
            }
            RESET_ON_LOAD => {
                let location = self.location_or_current(&args);
                self.reset_on_load(&location).await
            }
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl CommandExecutor for StateOrchestrator {
    fn execute<'a>(&'a self, id: &'a str, args: CommandArgs) -> CommandFuture<'a> {
        Box::pin(self.dispatch(id, args))
    }
}

impl RecoveryCommand for StateOrchestrator {
    fn recover(&self) -> RecoveryFuture<'_> {
        Box::pin(self.reset())
    }
}
