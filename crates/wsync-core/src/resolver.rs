//! Window identity resolution.
//!
//! The candidate name comes from the URL (`{base}/workspaces/{name}`) or
//! falls back to the default workspace. A [`NamingOracle`] then decides
//! whether another open session already claims it.
//!
//! [`BeaconOracle`] negotiates over shared key-value storage:
//!
//! ```text
//!   window B (resolving "a")          window A (claimed "a")
//!   ─────────────────────────         ──────────────────────
//!   set beacon = <token>-<ms>  ───►   sees beacon
//!                              ◄───   set ping = "a-<ms>"
//!   ping names candidate → Conflict
//!
//!   no matching ping within beacon_timeout → claim, remove beacon,
//!   announce with a ping of our own
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::page_config::{PageConfig, WindowIdentity};
use crate::prompt::{Prompt, PromptButton, PromptRequest};
use crate::route::{NavigateOptions, RouteLocation, Router};
use crate::storage::{KeyValueStorage, StorageEvents};

pub type OracleFuture<'a> = Pin<Box<dyn Future<Output = Result<WindowIdentity, ResolveError>> + Send + 'a>>;

/// Kept outside the `wsync:` state namespace.
const BEACON_KEY: &str = "wsync-resolver:beacon";
const PING_KEY: &str = "wsync-resolver:ping";

/// Characters escaped in a workspace path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Decides whether a candidate window name is free.
pub trait NamingOracle: Send + Sync {
    fn resolve<'a>(&'a self, candidate: &'a str) -> OracleFuture<'a>;
}

// =============================================================================
// Beacon oracle
// =============================================================================

#[derive(Default)]
struct BeaconState {
    /// Names other windows have reported.
    known: BTreeSet<String>,
    candidate: Option<String>,
    claimed: Option<String>,
    /// Fires when resolution of `candidate` must fail.
    failure: Option<oneshot::Sender<ResolveError>>,
    closed: bool,
}

struct BeaconInner {
    storage: Arc<dyn KeyValueStorage>,
    token: String,
    timeout: Duration,
    state: Mutex<BeaconState>,
    responder: Mutex<Option<JoinHandle<()>>>,
}

/// Naming oracle that negotiates with peers through shared storage.
pub struct BeaconOracle {
    inner: Arc<BeaconInner>,
}

impl std::fmt::Debug for BeaconOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconOracle")
            .field("token", &self.inner.token)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl BeaconOracle {
    /// Start listening for peers. Must be called inside a tokio runtime.
    pub fn start(storage: Arc<dyn KeyValueStorage>, timeout: Duration) -> Self {
        let token = format!("{:016x}-{}", rand::rng().random::<u64>(), now_ms());
        let events = storage.subscribe();
        let inner = Arc::new(BeaconInner {
            storage,
            token,
            timeout,
            state: Mutex::new(BeaconState::default()),
            responder: Mutex::new(None),
        });
        let handle = tokio::spawn(respond(Arc::downgrade(&inner), events));
        *inner
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Self { inner }
    }

    /// The name this oracle has claimed, if any.
    pub fn claimed(&self) -> Option<String> {
        self.inner.lock().claimed.clone()
    }

    async fn negotiate(&self, candidate: &str) -> Result<WindowIdentity, ResolveError> {
        let failed = {
            let mut state = self.inner.lock();
            if let Some(claimed) = &state.claimed {
                return Ok(WindowIdentity::new(claimed.clone()));
            }
            if state.closed {
                return Err(ResolveError::Oracle(
                    "storage change stream closed".to_string(),
                ));
            }
            if state.known.contains(candidate) {
                return Err(ResolveError::Conflict {
                    name: candidate.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            state.candidate = Some(candidate.to_string());
            state.failure = Some(tx);
            rx
        };

        debug!(candidate, "beacon sent");
        self.inner
            .storage
            .set(BEACON_KEY, &format!("{}-{}", self.inner.token, now_ms()));

        let outcome = tokio::select! {
            () = tokio::time::sleep(self.inner.timeout) => Ok(()),
            failure = failed => match failure {
                Ok(err) => Err(err),
                Err(_) => Err(ResolveError::Oracle("beacon responder stopped".to_string())),
            },
        };

        let mut state = self.inner.lock();
        state.failure = None;
        match outcome {
            Ok(()) => {
                state.candidate = None;
                state.claimed = Some(candidate.to_string());
                drop(state);
                self.inner.storage.remove(BEACON_KEY);
                self.inner.ping(candidate);
                info!(workspace = candidate, "window name claimed");
                Ok(WindowIdentity::new(candidate))
            }
            Err(err) => {
                state.candidate = None;
                Err(err)
            }
        }
    }
}

impl NamingOracle for BeaconOracle {
    fn resolve<'a>(&'a self, candidate: &'a str) -> OracleFuture<'a> {
        Box::pin(self.negotiate(candidate))
    }
}

impl BeaconInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, BeaconState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ping(&self, name: &str) {
        self.storage.set(PING_KEY, &format!("{name}-{}", now_ms()));
    }
}

impl Drop for BeaconInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .responder
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn respond(weak: Weak<BeaconInner>, mut events: StorageEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else { return };
        match (event.key.as_deref(), event.new_value.as_deref()) {
            (Some(PING_KEY), Some(value)) => {
                let reported = reported_name(value).to_string();
                let mut state = inner.lock();
                if state.candidate.as_deref() == Some(reported.as_str()) {
                    if let Some(failure) = state.failure.take() {
                        let _ = failure.send(ResolveError::Conflict {
                            name: reported.clone(),
                        });
                    }
                }
                state.known.insert(reported);
            }
            (Some(BEACON_KEY), Some(_)) => {
                let name = {
                    let state = inner.lock();
                    state.claimed.clone().or_else(|| state.candidate.clone())
                };
                if let Some(name) = name {
                    inner.ping(&name);
                }
            }
            _ => {}
        }
    }

    if let Some(inner) = weak.upgrade() {
        warn!("storage change stream closed; window naming disabled");
        let mut state = inner.lock();
        state.closed = true;
        if let Some(failure) = state.failure.take() {
            let _ = failure.send(ResolveError::Oracle(
                "storage change stream closed".to_string(),
            ));
        }
    }
}

/// Strip the trailing `-<ms>` stamp from a ping value.
fn reported_name(value: &str) -> &str {
    match value.rsplit_once('-') {
        Some((name, stamp)) if !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => value,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Window resolver
// =============================================================================

/// Derives the window identity from a location and publishes it.
pub struct WindowResolver {
    oracle: Arc<dyn NamingOracle>,
    page: Arc<PageConfig>,
}

impl std::fmt::Debug for WindowResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowResolver")
            .field("page", &self.page)
            .finish_non_exhaustive()
    }
}

impl WindowResolver {
    pub fn new(oracle: Arc<dyn NamingOracle>, page: Arc<PageConfig>) -> Self {
        Self { oracle, page }
    }

    /// `{base_url}/workspaces`
    pub fn workspaces_url(&self) -> String {
        format!("{}/workspaces", self.page.base_url().trim_end_matches('/'))
    }

    /// Workspace named in `location`, or the default workspace.
    pub fn candidate(&self, location: &RouteLocation) -> String {
        let prefix = format!("{}/", self.workspaces_url());
        location
            .path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.split('/').next())
            .filter(|segment| !segment.is_empty())
            .map_or_else(
                || self.page.default_workspace(),
                |segment| percent_decode_str(segment).decode_utf8_lossy().into_owned(),
            )
    }

    /// Resolve the identity for `location` and publish it on success.
    pub async fn resolve(&self, location: &RouteLocation) -> Result<WindowIdentity, ResolveError> {
        let candidate = self.candidate(location);
        let identity = self.oracle.resolve(&candidate).await?;
        self.page.publish_workspace(&identity);
        info!(workspace = %identity, "window identity resolved");
        Ok(identity)
    }

    /// Ask the user for another workspace name and hard-navigate there.
    ///
    /// Returns the URL navigated to. Invalid answers re-prompt in warning
    /// mode; a prompt failure ends the flow.
    pub async fn redirect(
        &self,
        router: &dyn Router,
        prompt: &dyn Prompt,
        conflicted: &str,
    ) -> crate::Result<String> {
        let mut warning = false;
        let name = loop {
            let result = prompt.launch(redirect_request(warning)).await?;
            match result.value.filter(|_| result.accept) {
                Some(name) if is_valid_workspace_name(&name) => break name.trim().to_string(),
                Some(name) => {
                    warn!(name = %name, "rejected workspace name");
                    warning = true;
                }
                None => warning = true,
            }
        };

        let url = format!(
            "{}/{}{}",
            self.workspaces_url(),
            utf8_percent_encode(&name, SEGMENT),
            self.request_rest(&router.current(), conflicted)
        );
        router.navigate(
            &url,
            NavigateOptions {
                silent: true,
                hard: true,
            },
        )?;
        info!(workspace = %name, url = %url, "redirected to a different workspace");
        Ok(url)
    }

    /// Remainder of the request after the workspace (or page) prefix.
    fn request_rest(&self, location: &RouteLocation, conflicted: &str) -> String {
        let request = location.request();
        let workspace_prefix = format!(
            "{}/{}",
            self.workspaces_url(),
            utf8_percent_encode(conflicted, SEGMENT)
        );
        let base = self.page.base_url();
        let rest = request
            .strip_prefix(&workspace_prefix)
            .or_else(|| request.strip_prefix(base.trim_end_matches('/')))
            .unwrap_or(&request);
        if rest.is_empty() || rest.starts_with(['/', '?', '#']) {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }
}

fn redirect_request(warning: bool) -> PromptRequest {
    let body = if warning {
        "That name is invalid or already in use. Enter a different workspace name."
    } else {
        "This workspace is open in another window. Enter a different workspace name."
    };
    PromptRequest {
        title: "Please use a different workspace.".to_string(),
        body: body.to_string(),
        text_input: true,
        warning,
        buttons: vec![PromptButton::cancel("Cancel"), PromptButton::ok("Switch Workspace")],
    }
}

/// Non-empty after trimming, and free of URL structure characters.
pub fn is_valid_workspace_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && !name.contains(['/', '?', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, PromptError};
    use crate::prompt::{PromptResult, PromptStep, ScriptedPrompt};
    use crate::route::{HistoryRouter, HostEvent, RecordingHost};
    use crate::storage::MemoryStorage;

    const TIMEOUT: Duration = Duration::from_millis(100);

    struct FixedOracle(Result<WindowIdentity, ResolveError>);

    impl NamingOracle for FixedOracle {
        fn resolve<'a>(&'a self, _candidate: &'a str) -> OracleFuture<'a> {
            Box::pin(async move { self.0.clone() })
        }
    }

    fn page() -> Arc<PageConfig> {
        let page = PageConfig::new();
        page.set_option(crate::page_config::DEFAULT_WORKSPACE_KEY, "default");
        page.set_option(crate::page_config::BASE_URL_KEY, "/lab");
        Arc::new(page)
    }

    #[test]
    fn reported_name_strips_timestamp_only() {
        assert_eq!(reported_name("proj-1-1700000000000"), "proj-1");
        assert_eq!(reported_name("proj-x"), "proj-x");
        assert_eq!(reported_name("plain"), "plain");
    }

    #[test]
    fn candidate_comes_from_workspace_segment() {
        let resolver = WindowResolver::new(Arc::new(FixedOracle(Ok(WindowIdentity::new("x")))), page());
        let named = RouteLocation::parse("/lab/workspaces/my%20ws/tree?x=1");
        assert_eq!(resolver.candidate(&named), "my ws");
        assert_eq!(resolver.candidate(&RouteLocation::parse("/lab/tree")), "default");
        assert_eq!(resolver.candidate(&RouteLocation::parse("/lab/workspaces/")), "default");
    }

    #[test]
    fn workspace_names_reject_url_structure() {
        assert!(is_valid_workspace_name("proj2"));
        assert!(!is_valid_workspace_name("   "));
        assert!(!is_valid_workspace_name("a/b"));
        assert!(!is_valid_workspace_name("a?b"));
        assert!(!is_valid_workspace_name("a#b"));
    }

    #[tokio::test]
    async fn resolve_publishes_identity() {
        let page = page();
        let resolver = WindowResolver::new(
            Arc::new(FixedOracle(Ok(WindowIdentity::new("proj1")))),
            page.clone(),
        );
        let identity = resolver
            .resolve(&RouteLocation::parse("/lab/workspaces/proj1"))
            .await
            .unwrap();
        assert_eq!(identity.as_str(), "proj1");
        assert_eq!(page.workspace(), Some(identity));
    }

    #[tokio::test]
    async fn failed_resolve_publishes_nothing() {
        let page = page();
        let resolver = WindowResolver::new(
            Arc::new(FixedOracle(Err(ResolveError::Conflict { name: "a".to_string() }))),
            page.clone(),
        );
        assert!(resolver.resolve(&RouteLocation::parse("/lab")).await.is_err());
        assert!(page.workspace().is_none());
    }

    #[tokio::test]
    async fn redirect_reprompts_then_navigates_hard() {
        let page = page();
        let resolver = WindowResolver::new(Arc::new(FixedOracle(Ok(WindowIdentity::new("x")))), page);
        let host = Arc::new(RecordingHost::new());
        let router = HistoryRouter::new("/lab/workspaces/proj1/tree/a.txt?x=1", host.clone());
        let prompt = ScriptedPrompt::with_steps([
            PromptStep::Answer(PromptResult::accepted(Some("bad/name".to_string()))),
            PromptStep::Answer(PromptResult::declined()),
            PromptStep::Answer(PromptResult::accepted(Some("proj2".to_string()))),
        ]);

        let url = resolver.redirect(&router, &prompt, "proj1").await.unwrap();
        assert_eq!(url, "/lab/workspaces/proj2/tree/a.txt?x=1");
        let shown = prompt.shown();
        assert_eq!(shown.len(), 3);
        assert!(!shown[0].warning);
        assert!(shown[1].warning && shown[2].warning);
        assert_eq!(host.events(), vec![HostEvent::HardNavigate(url)]);
    }

    #[tokio::test]
    async fn redirect_from_page_url_keeps_rest() {
        let resolver = WindowResolver::new(Arc::new(FixedOracle(Ok(WindowIdentity::new("x")))), page());
        let router = HistoryRouter::new("/lab/tree", Arc::new(RecordingHost::new()));
        let prompt = ScriptedPrompt::with_steps([PromptStep::Answer(PromptResult::accepted(
            Some("other".to_string()),
        ))]);
        let url = resolver.redirect(&router, &prompt, "default").await.unwrap();
        assert_eq!(url, "/lab/workspaces/other/tree");
    }

    #[tokio::test]
    async fn redirect_ends_when_prompt_is_unavailable() {
        let resolver = WindowResolver::new(Arc::new(FixedOracle(Ok(WindowIdentity::new("x")))), page());
        let router = HistoryRouter::new("/lab", Arc::new(RecordingHost::new()));
        let err = resolver
            .redirect(&router, &ScriptedPrompt::new(), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Prompt(PromptError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_names_both_resolve() {
        let storage = MemoryStorage::new();
        let a = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        let b = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        assert_eq!(a.resolve("a").await.unwrap().as_str(), "a");
        assert_eq!(b.resolve("b").await.unwrap().as_str(), "b");
        assert!(storage.get(BEACON_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_name_answers_later_beacons() {
        let storage = MemoryStorage::new();
        let a = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        a.resolve("proj1").await.unwrap();

        // Started after the announcement, so only the beacon reply can tell.
        let b = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        assert_eq!(
            b.resolve("proj1").await.unwrap_err(),
            ResolveError::Conflict {
                name: "proj1".to_string()
            }
        );
        assert_eq!(b.resolve("proj2").await.unwrap().as_str(), "proj2");
    }

    #[tokio::test(start_paused = true)]
    async fn announced_names_are_rejected_without_waiting() {
        let storage = MemoryStorage::new();
        let a = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        let b = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        a.resolve("proj1").await.unwrap();
        tokio::task::yield_now().await;

        let start = tokio::time::Instant::now();
        assert!(matches!(
            b.resolve("proj1").await,
            Err(ResolveError::Conflict { .. })
        ));
        assert!(start.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn second_resolve_returns_claimed_name() {
        let storage = MemoryStorage::new();
        let a = BeaconOracle::start(Arc::new(storage.handle()), TIMEOUT);
        a.resolve("first").await.unwrap();
        assert_eq!(a.resolve("second").await.unwrap().as_str(), "first");
        assert_eq!(a.claimed().as_deref(), Some("first"));
    }
}
