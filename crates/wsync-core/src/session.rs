//! Session bootstrap: wire every component for one window.
//!
//! ```text
//! router.current() → WindowResolver ──err──► redirect prompt, abandon
//!                         │ok
//!                         ▼
//!            publish identity to PageConfig
//!                         ▼
//!   gate → StateDb → SaveCoordinator → SplashScreen → StateOrchestrator
//!                         ▼
//!      register routes, show splash gated on store readiness
//!                         ▼
//!                 route current location
//! ```

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::config::WsyncConfig;
use crate::error::Error;
use crate::orchestrator::{OrchestratorParts, StateOrchestrator};
use crate::page_config::{PageConfig, WindowIdentity};
use crate::prompt::Prompt;
use crate::remote::WorkspaceService;
use crate::resolver::{NamingOracle, WindowResolver};
use crate::route::{CommandArgs, CommandExecutor, CommandOutcome, Router};
use crate::save::SaveCoordinator;
use crate::splash::{RecoveryCommand, SplashScreen, SplashSurface};
use crate::state_db::StateDb;
use crate::storage::KeyValueStorage;
use crate::transform::TransformGate;

/// Storage namespace for workspace state keys.
pub const STATE_NAMESPACE: &str = "wsync";

/// Collaborators a session is built from.
pub struct SessionParts {
    pub config: WsyncConfig,
    pub storage: Arc<dyn KeyValueStorage>,
    pub oracle: Arc<dyn NamingOracle>,
    pub service: Arc<dyn WorkspaceService>,
    pub router: Arc<dyn Router>,
    pub prompt: Arc<dyn Prompt>,
    pub surface: Arc<dyn SplashSurface>,
}

/// A running window session.
pub struct Session {
    /// Keeps the naming oracle answering peers for the session's lifetime.
    resolver: WindowResolver,
    page: Arc<PageConfig>,
    store: Arc<StateDb>,
    orchestrator: Arc<StateOrchestrator>,
    router: Arc<dyn Router>,
    splash: SplashScreen,
    routed: Vec<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workspace", self.workspace())
            .field("routed", &self.routed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Resolve the window, build the pipeline and route the current location.
    ///
    /// A resolution failure runs the redirect flow and returns the
    /// resolution error; the session is abandoned.
    pub async fn bootstrap(parts: SessionParts) -> crate::Result<Self> {
        let SessionParts {
            config,
            storage,
            oracle,
            service,
            router,
            prompt,
            surface,
        } = parts;

        let page = Arc::new(PageConfig::from_config(&config));
        let resolver = WindowResolver::new(oracle, Arc::clone(&page));
        let location = router.current();
        let identity = match resolver.resolve(&location).await {
            Ok(identity) => identity,
            Err(err) => {
                let candidate = resolver.candidate(&location);
                warn!(workspace = %candidate, error = %err, "window resolution failed");
                if let Err(redirect_err) = resolver
                    .redirect(router.as_ref(), prompt.as_ref(), &candidate)
                    .await
                {
                    warn!(error = %redirect_err, "workspace redirect did not complete");
                }
                return Err(Error::Resolve(err));
            }
        };

        let gate = TransformGate::new();
        let store = Arc::new(StateDb::new(
            STATE_NAMESPACE,
            Arc::clone(&storage),
            gate.clone(),
        ));
        let saves = SaveCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&service),
            identity.clone(),
            config.save.debounce(),
        );
        let splash = SplashScreen::new(
            surface,
            prompt,
            config.splash.recover_timeout(),
            config.splash.fade(),
        );
        let orchestrator = Arc::new(StateOrchestrator::new(OrchestratorParts {
            page: Arc::clone(&page),
            store: Arc::clone(&store),
            gate,
            storage,
            service,
            saves,
            router: Arc::clone(&router),
            splash: splash.clone(),
        }));
        orchestrator.register_routes()?;
        let recovery: Weak<dyn RecoveryCommand> =
            Arc::downgrade(&orchestrator) as Weak<dyn RecoveryCommand>;
        splash.set_recovery(recovery);

        let ready_store = Arc::clone(&store);
        let loading = splash.show(async move { ready_store.ready().await });
        let routed = router.route(orchestrator.as_ref()).await;
        loading.dispose();
        let routed = routed?;

        info!(workspace = %identity, commands = ?routed, "session started");
        Ok(Self {
            resolver,
            page,
            store,
            orchestrator,
            router,
            splash,
            routed,
        })
    }

    pub fn workspace(&self) -> &WindowIdentity {
        self.orchestrator.workspace()
    }

    pub fn resolver(&self) -> &WindowResolver {
        &self.resolver
    }

    pub fn page(&self) -> &Arc<PageConfig> {
        &self.page
    }

    pub fn store(&self) -> &Arc<StateDb> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<StateOrchestrator> {
        &self.orchestrator
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    pub fn splash(&self) -> &SplashScreen {
        &self.splash
    }

    /// Commands that ran during bootstrap routing.
    pub fn routed(&self) -> &[String] {
        &self.routed
    }

    /// Route the router's current location again.
    pub async fn route(&self) -> crate::Result<Vec<String>> {
        self.router.route(self.orchestrator.as_ref()).await
    }

    pub async fn execute(&self, id: &str, args: CommandArgs) -> crate::Result<CommandOutcome> {
        self.orchestrator.execute(id, args).await
    }
}
