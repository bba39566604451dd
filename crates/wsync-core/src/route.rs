//! URL routing: locations, the router collaborator, and command dispatch.
//!
//! Routes map a regex over `path + search + hash` to a command id. On
//! `route()`, every matching command runs in ascending rank order until
//! one returns [`CommandOutcome::Stop`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RouteError;

/// Future returned by command execution.
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = crate::Result<CommandOutcome>> + Send + 'a>>;

/// Future returned by [`Router::route`].
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = crate::Result<Vec<String>>> + Send + 'a>>;

// =============================================================================
// Locations
// =============================================================================

/// A parsed request: `path`, `search` (with leading `?`), `hash` (with `#`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLocation {
    pub path: String,
    pub search: String,
    pub hash: String,
}

impl RouteLocation {
    /// Split a request string. Scheme and host, if present, are dropped.
    pub fn parse(request: &str) -> Self {
        let request = strip_origin(request);
        let (rest, hash) = match request.find('#') {
            Some(at) => (&request[..at], &request[at..]),
            None => (request, ""),
        };
        let (path, search) = match rest.find('?') {
            Some(at) => (&rest[..at], &rest[at..]),
            None => (rest, ""),
        };
        Self {
            path: path.to_string(),
            search: if search == "?" { String::new() } else { search.to_string() },
            hash: hash.to_string(),
        }
    }

    /// `path + search + hash`.
    pub fn request(&self) -> String {
        format!("{}{}{}", self.path, self.search, self.hash)
    }

    fn raw_params(&self) -> impl Iterator<Item = &str> {
        self.search
            .trim_start_matches('?')
            .split('&')
            .filter(|p| !p.is_empty())
    }

    /// Decoded query pairs in order. Presence-only flags have an empty value.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.search.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.query_pairs().iter().any(|(k, _)| k == name)
    }

    /// First value of `name`; `Some("")` for a bare flag.
    pub fn param(&self, name: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Copy of this location with every occurrence of `name` removed.
    /// Other parameters keep their original encoding.
    #[must_use]
    pub fn without_param(&self, name: &str) -> Self {
        let kept: Vec<&str> = self
            .raw_params()
            .filter(|raw| {
                let key = raw.split('=').next().unwrap_or_default();
                let decoded: String = url::form_urlencoded::parse(key.as_bytes())
                    .map(|(k, _)| k.into_owned())
                    .collect();
                decoded != name
            })
            .collect();
        Self {
            path: self.path.clone(),
            search: if kept.is_empty() {
                String::new()
            } else {
                format!("?{}", kept.join("&"))
            },
            hash: self.hash.clone(),
        }
    }
}

impl fmt::Display for RouteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.request())
    }
}

fn strip_origin(request: &str) -> &str {
    let Some(scheme_end) = request.find("://") else {
        return request;
    };
    let scheme = &request[..scheme_end];
    if scheme.is_empty() || scheme.contains(['/', '?', '#']) {
        return request;
    }
    let after = &request[scheme_end + 3..];
    match after.find(['/', '?', '#']) {
        Some(at) => &after[at..],
        None => "/",
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Whether routing continues past a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Continue,
    Stop,
}

/// Arguments passed to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    /// Route that triggered the command, for route-driven commands.
    pub location: Option<RouteLocation>,
    /// `save-state`: skip the debounce.
    pub immediate: bool,
    /// `recover-state`: also clear all local storage.
    pub global: bool,
}

impl CommandArgs {
    pub fn for_location(location: RouteLocation) -> Self {
        Self {
            location: Some(location),
            ..Self::default()
        }
    }
}

/// Anything that can execute commands by id.
pub trait CommandExecutor: Send + Sync {
    fn execute<'a>(&'a self, id: &'a str, args: CommandArgs) -> CommandFuture<'a>;
}

// =============================================================================
// Router
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateOptions {
    /// Update the location without routing.
    pub silent: bool,
    /// Replace the whole document.
    pub hard: bool,
}

/// A route table entry.
#[derive(Debug, Clone)]
pub struct RouteRegistration {
    pub command: String,
    pub pattern: Regex,
    /// Lower ranks run first.
    pub rank: u32,
}

impl RouteRegistration {
    pub fn new(command: impl Into<String>, pattern: &str, rank: u32) -> Result<Self, RouteError> {
        let pattern = Regex::new(pattern).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            command: command.into(),
            pattern,
            rank,
        })
    }
}

/// Router collaborator used by the orchestrator and session.
pub trait Router: Send + Sync {
    fn register(&self, registration: RouteRegistration);

    fn current(&self) -> RouteLocation;

    fn navigate(&self, url: &str, options: NavigateOptions) -> Result<(), RouteError>;

    /// Reload the whole document.
    fn reload(&self) -> Result<(), RouteError>;

    /// Dispatch the current location; returns the command ids that ran.
    fn route<'a>(&'a self, executor: &'a dyn CommandExecutor) -> RouteFuture<'a>;
}

/// Document-level capability behind hard navigation and reload.
pub trait PageHost: Send + Sync {
    fn hard_navigate(&self, url: &str) -> Result<(), RouteError>;

    fn reload(&self) -> Result<(), RouteError>;
}

/// Something the page host was asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "url", rename_all = "snake_case")]
pub enum HostEvent {
    HardNavigate(String),
    Reload,
}

/// Page host that records requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: HostEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PageHost for RecordingHost {
    fn hard_navigate(&self, url: &str) -> Result<(), RouteError> {
        self.record(HostEvent::HardNavigate(url.to_string()));
        Ok(())
    }

    fn reload(&self) -> Result<(), RouteError> {
        self.record(HostEvent::Reload);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RouterState {
    routes: Vec<RouteRegistration>,
    location: RouteLocation,
    history: Vec<RouteLocation>,
    routing_due: bool,
}

/// In-process router with a history stack.
pub struct HistoryRouter {
    state: Mutex<RouterState>,
    host: Arc<dyn PageHost>,
}

impl fmt::Debug for HistoryRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("HistoryRouter")
            .field("location", &state.location)
            .field("routes", &state.routes.len())
            .finish_non_exhaustive()
    }
}

impl HistoryRouter {
    pub fn new(initial: &str, host: Arc<dyn PageHost>) -> Self {
        Self {
            state: Mutex::new(RouterState {
                location: RouteLocation::parse(initial),
                ..RouterState::default()
            }),
            host,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Previous locations, oldest first.
    pub fn history(&self) -> Vec<RouteLocation> {
        self.lock().history.clone()
    }

    /// Registered command ids in dispatch order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().routes.iter().map(|r| r.command.clone()).collect()
    }

    /// True after a non-silent navigation, until the next `route`.
    pub fn routing_due(&self) -> bool {
        self.lock().routing_due
    }

    async fn dispatch(&self, executor: &dyn CommandExecutor) -> crate::Result<Vec<String>> {
        let (location, matched) = {
            let mut state = self.lock();
            state.routing_due = false;
            let request = state.location.request();
            let matched: Vec<String> = state
                .routes
                .iter()
                .filter(|r| r.pattern.is_match(&request))
                .map(|r| r.command.clone())
                .collect();
            (state.location.clone(), matched)
        };

        let mut ran = Vec::new();
        for command in matched {
            debug!(command = %command, request = %location, "routing");
            let outcome = executor
                .execute(&command, CommandArgs::for_location(location.clone()))
                .await?;
            ran.push(command);
            if outcome == CommandOutcome::Stop {
                break;
            }
        }
        Ok(ran)
    }
}

impl Router for HistoryRouter {
    fn register(&self, registration: RouteRegistration) {
        let mut state = self.lock();
        state.routes.push(registration);
        state.routes.sort_by_key(|r| r.rank);
    }

    fn current(&self) -> RouteLocation {
        self.lock().location.clone()
    }

    fn navigate(&self, url: &str, options: NavigateOptions) -> Result<(), RouteError> {
        {
            let mut state = self.lock();
            let previous = std::mem::replace(&mut state.location, RouteLocation::parse(url));
            state.history.push(previous);
            if !options.silent {
                state.routing_due = true;
            }
        }
        info!(url, silent = options.silent, hard = options.hard, "navigate");
        if options.hard {
            self.host.hard_navigate(url)?;
        }
        Ok(())
    }

    fn reload(&self) -> Result<(), RouteError> {
        info!(location = %self.current(), "reload");
        self.host.reload()
    }

    fn route<'a>(&'a self, executor: &'a dyn CommandExecutor) -> RouteFuture<'a> {
        Box::pin(self.dispatch(executor))
    }
}
