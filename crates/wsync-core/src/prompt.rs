//! User prompt capability.
//!
//! The session asks the user two things: whether to keep waiting on a
//! stuck load, and which workspace name to use after a conflict. The
//! rendering is somebody else's job; this module defines the request and
//! answer shapes plus a scripted implementation for tests and headless use.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::PromptError;

pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<PromptResult, PromptError>> + Send + 'a>>;

/// One button on a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptButton {
    pub label: String,
    /// Whether choosing this button counts as accepting.
    pub accept: bool,
    /// Rendered as a warning/destructive action.
    pub warn: bool,
}

impl PromptButton {
    pub fn cancel(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            accept: false,
            warn: false,
        }
    }

    pub fn ok(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            accept: true,
            warn: false,
        }
    }

    pub fn warn(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            accept: true,
            warn: true,
        }
    }
}

/// What to show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub title: String,
    pub body: String,
    /// Ask for a text value as well as a button choice.
    pub text_input: bool,
    /// Show the body as a warning.
    pub warning: bool,
    pub buttons: Vec<PromptButton>,
}

/// The user's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    pub accept: bool,
    pub value: Option<String>,
}

impl PromptResult {
    pub fn accepted(value: Option<String>) -> Self {
        Self {
            accept: true,
            value,
        }
    }

    pub fn declined() -> Self {
        Self::default()
    }
}

/// Modal prompt capability.
pub trait Prompt: Send + Sync {
    fn launch(&self, request: PromptRequest) -> PromptFuture<'_>;

    /// Close any open prompt. Its `launch` future fails with
    /// [`PromptError::Dismissed`].
    fn dismiss(&self);
}

/// A scripted reply for [`ScriptedPrompt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStep {
    Answer(PromptResult),
    /// Stay open until dismissed.
    Hold,
}

/// Prompt that replays scripted answers and records what it was shown.
///
/// With no steps left, `launch` fails with [`PromptError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    steps: Mutex<VecDeque<PromptStep>>,
    shown: Mutex<Vec<PromptRequest>>,
    dismissed: Notify,
    dismiss_count: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = PromptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn push(&self, step: PromptStep) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    /// Every request launched so far.
    pub fn shown(&self) -> Vec<PromptRequest> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dismiss_count(&self) -> usize {
        self.dismiss_count.load(Ordering::SeqCst)
    }
}

impl Prompt for ScriptedPrompt {
    fn launch(&self, request: PromptRequest) -> PromptFuture<'_> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        // Register interest before returning so a dismiss racing the
        // first poll is not lost.
        let notified = self.dismissed.notified();
        Box::pin(async move {
            match step {
                Some(PromptStep::Answer(result)) => Ok(result),
                Some(PromptStep::Hold) => {
                    notified.await;
                    Err(PromptError::Dismissed)
                }
                None => Err(PromptError::Unavailable(
                    "no scripted answer left".to_string(),
                )),
            }
        })
    }

    fn dismiss(&self) {
        self.dismiss_count.fetch_add(1, Ordering::SeqCst);
        self.dismissed.notify_waiters();
    }
}
