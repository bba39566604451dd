//! Splash screen with reference-counted shows and timeout escalation.
//!
//! ```text
//!            show (count 0→1)            recover_timeout elapsed
//!   Hidden ───────────────────► Visible ─────────────────────────► Escalated
//!     ▲                          ▲   │                                 │
//!     │     count → 0            │   └── show: rearm timer             │
//!     └──── fade, then remove ───┴──── "Keep Waiting": rearm ◄─────────┘
//!                                       "Clear Workspace": run recovery
//! ```
//!
//! Overlapping shows share one visible surface. Escalation loops between
//! `Waiting` and `PromptOpen` until the user clears the workspace or the
//! count returns to zero, which dismisses any open prompt.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PromptError;
use crate::prompt::{Prompt, PromptButton, PromptRequest};

pub type RecoveryFuture<'a> = Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>>;

type ReadyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The visual element. Rendering lives elsewhere.
pub trait SplashSurface: Send + Sync {
    fn show(&self);

    /// Start the fade-out.
    fn fade(&self);

    fn remove(&self);
}

/// Command run when the user chooses to clear the workspace.
pub trait RecoveryCommand: Send + Sync {
    fn recover(&self) -> RecoveryFuture<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplashPhase {
    Hidden,
    Visible,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceEvent {
    Show,
    Fade,
    Remove,
}

/// Surface that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: SurfaceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl SplashSurface for RecordingSurface {
    fn show(&self) {
        self.record(SurfaceEvent::Show);
    }

    fn fade(&self) {
        self.record(SurfaceEvent::Fade);
    }

    fn remove(&self) {
        self.record(SurfaceEvent::Remove);
    }
}

struct SplashState {
    count: usize,
    phase: SplashPhase,
    escalation: Option<JoinHandle<()>>,
    prompt_open: bool,
    /// The user chose to clear; the escalation task is running recovery.
    recovering: bool,
    /// Bumped on every show so a stale removal timer does nothing.
    epoch: u64,
}

struct SplashInner {
    surface: Arc<dyn SplashSurface>,
    prompt: Arc<dyn Prompt>,
    recover_timeout: Duration,
    fade: Duration,
    recovery: Mutex<Option<Weak<dyn RecoveryCommand>>>,
    state: Mutex<SplashState>,
}

/// Shared splash component. Cheap to clone.
#[derive(Clone)]
pub struct SplashScreen {
    inner: Arc<SplashInner>,
}

impl std::fmt::Debug for SplashScreen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplashScreen")
            .field("count", &self.count())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SplashScreen {
    pub fn new(
        surface: Arc<dyn SplashSurface>,
        prompt: Arc<dyn Prompt>,
        recover_timeout: Duration,
        fade: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SplashInner {
                surface,
                prompt,
                recover_timeout,
                fade,
                recovery: Mutex::new(None),
                state: Mutex::new(SplashState {
                    count: 0,
                    phase: SplashPhase::Hidden,
                    escalation: None,
                    prompt_open: false,
                    recovering: false,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Register the command offered when escalation prompts the user.
    pub fn set_recovery(&self, recovery: Weak<dyn RecoveryCommand>) {
        *self
            .inner
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(recovery);
    }

    /// Outstanding shows.
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn phase(&self) -> SplashPhase {
        self.inner.lock().phase
    }

    pub fn is_escalation_armed(&self) -> bool {
        self.inner
            .lock()
            .escalation
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Show the splash until `ready` settles and the handle is disposed.
    pub fn show(&self, ready: impl Future<Output = ()> + Send + 'static) -> SplashHandle {
        let mut state = self.inner.lock();
        state.count += 1;
        state.epoch += 1;
        if state.phase == SplashPhase::Hidden {
            state.phase = SplashPhase::Visible;
            self.inner.surface.show();
        }
        if !state.prompt_open && !state.recovering {
            if let Some(previous) = state.escalation.take() {
                previous.abort();
            }
            state.escalation = Some(tokio::spawn(escalate(Arc::clone(&self.inner))));
        }
        debug!(count = state.count, "splash shown");
        drop(state);

        SplashHandle {
            splash: self.clone(),
            ready: Mutex::new(Some(Box::pin(ready))),
            disposed: AtomicBool::new(false),
        }
    }
}

impl SplashInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, SplashState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recovery(&self) -> Option<Arc<dyn RecoveryCommand>> {
        self.recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.count = state.count.saturating_sub(1);
        debug!(count = state.count, "splash released");
        if state.count > 0 {
            return;
        }

        if let Some(task) = state.escalation.take() {
            if state.recovering {
                state.escalation = Some(task);
            } else {
                task.abort();
            }
        }
        if state.prompt_open {
            state.prompt_open = false;
            self.prompt.dismiss();
        }
        state.phase = SplashPhase::Hidden;
        let epoch = state.epoch;
        drop(state);

        self.surface.fade();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.fade).await;
            let state = inner.lock();
            if state.count == 0 && state.epoch == epoch {
                inner.surface.remove();
            }
        });
    }
}

/// Escalation loop: `Waiting` until the timeout, then `PromptOpen`.
async fn escalate(inner: Arc<SplashInner>) {
    loop {
        tokio::time::sleep(inner.recover_timeout).await;
        let Some(recovery) = inner.recovery() else {
            debug!("splash timed out with no recovery registered");
            return;
        };

        {
            let mut state = inner.lock();
            if state.count == 0 {
                return;
            }
            state.phase = SplashPhase::Escalated;
            state.prompt_open = true;
        }
        info!("loading is taking a long time; offering recovery");
        let answer = inner.prompt.launch(recovery_request()).await;

        let accepted = matches!(&answer, Ok(result) if result.accept);
        {
            let mut state = inner.lock();
            state.prompt_open = false;
            state.recovering = accepted;
            if state.phase == SplashPhase::Escalated {
                state.phase = SplashPhase::Visible;
            }
        }
        match answer {
            Ok(_) if accepted => {
                info!("user chose to clear the workspace");
                if let Err(err) = recovery.recover().await {
                    warn!(error = %err, "workspace recovery failed");
                }
                inner.lock().recovering = false;
                return;
            }
            Ok(_) => debug!("user chose to keep waiting"),
            Err(PromptError::Dismissed) => return,
            Err(err) => warn!(error = %err, "recovery prompt failed; still waiting"),
        }
    }
}

fn recovery_request() -> PromptRequest {
    PromptRequest {
        title: "Loading...".to_string(),
        body: "The loading screen is taking a long time. Would you like to clear the workspace or keep waiting?"
            .to_string(),
        text_input: false,
        warning: false,
        buttons: vec![
            PromptButton::cancel("Keep Waiting"),
            PromptButton::warn("Clear Workspace"),
        ],
    }
}

/// One outstanding show. Dispose it once its work is handed off.
pub struct SplashHandle {
    splash: SplashScreen,
    ready: Mutex<Option<ReadyFuture>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SplashHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplashHandle")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl SplashHandle {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Release this show once `ready` settles. Repeated calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ready = self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let inner = Arc::clone(&self.splash.inner);
        tokio::spawn(async move {
            if let Some(ready) = ready {
                ready.await;
            }
            inner.release();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptResult, PromptStep, ScriptedPrompt};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    const TIMEOUT: Duration = Duration::from_millis(12_000);
    const FADE: Duration = Duration::from_millis(200);

    #[derive(Default)]
    struct CountingRecovery {
        runs: AtomicUsize,
    }

    impl RecoveryCommand for CountingRecovery {
        fn recover(&self) -> RecoveryFuture<'_> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn splash(prompt: Arc<ScriptedPrompt>) -> (SplashScreen, Arc<RecordingSurface>) {
        let surface = Arc::new(RecordingSurface::new());
        (SplashScreen::new(surface.clone(), prompt, TIMEOUT, FADE), surface)
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_shows_share_one_surface() {
        let (splash, surface) = splash(Arc::new(ScriptedPrompt::new()));
        let a = splash.show(async {});
        let b = splash.show(async {});
        assert_eq!(splash.count(), 2);
        assert_eq!(surface.events(), vec![SurfaceEvent::Show]);

        a.dispose();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(splash.count(), 1);
        assert_eq!(splash.phase(), SplashPhase::Visible);

        b.dispose();
        tokio::time::sleep(FADE * 2).await;
        assert_eq!(splash.count(), 0);
        assert_eq!(splash.phase(), SplashPhase::Hidden);
        assert!(!splash.is_escalation_armed());
        assert_eq!(
            surface.events(),
            vec![SurfaceEvent::Show, SurfaceEvent::Fade, SurfaceEvent::Remove]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_twice_decrements_once() {
        let (splash, _) = splash(Arc::new(ScriptedPrompt::new()));
        let keep = splash.show(async {});
        let handle = splash.show(async {});
        handle.dispose();
        handle.dispose();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(splash.count(), 1);
        assert!(handle.is_disposed());
        keep.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_waits_for_ready() {
        let (splash, _) = splash(Arc::new(ScriptedPrompt::new()));
        let (tx, rx) = oneshot::channel::<()>();
        let handle = splash.show(async move {
            let _ = rx.await;
        });
        handle.dispose();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(splash.count(), 1);

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(splash.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reshow_during_fade_keeps_surface() {
        let (splash, surface) = splash(Arc::new(ScriptedPrompt::new()));
        splash.show(async {}).dispose();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let again = splash.show(async {});
        tokio::time::sleep(FADE * 2).await;
        assert_eq!(
            surface.events(),
            vec![SurfaceEvent::Show, SurfaceEvent::Fade, SurfaceEvent::Show]
        );
        assert_eq!(splash.count(), 1);
        again.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_recovery_does_not_prompt() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (splash, _) = splash(prompt.clone());
        let _handle = splash.show(async {});
        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(prompt.shown().is_empty());
        assert_eq!(splash.phase(), SplashPhase::Visible);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_waiting_rearms_then_clear_runs_recovery() {
        let prompt = Arc::new(ScriptedPrompt::with_steps([
            PromptStep::Answer(PromptResult::declined()),
            PromptStep::Answer(PromptResult::accepted(None)),
        ]));
        let (splash, _) = splash(prompt.clone());
        let recovery = Arc::new(CountingRecovery::default());
        let weak: Weak<dyn RecoveryCommand> = Arc::downgrade(&recovery) as Weak<dyn RecoveryCommand>;
        splash.set_recovery(weak);

        let _handle = splash.show(async {});
        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(prompt.shown().len(), 1);
        assert_eq!(recovery.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(TIMEOUT).await;
        assert_eq!(prompt.shown().len(), 2);
        assert_eq!(prompt.shown()[1].buttons[1].label, "Clear Workspace");
        assert_eq!(recovery.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settling_dismisses_open_prompt() {
        let prompt = Arc::new(ScriptedPrompt::with_steps([PromptStep::Hold]));
        let (splash, surface) = splash(prompt.clone());
        let recovery = Arc::new(CountingRecovery::default());
        splash.set_recovery(Arc::downgrade(&recovery) as Weak<dyn RecoveryCommand>);

        let handle = splash.show(async {});
        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(splash.phase(), SplashPhase::Escalated);

        handle.dispose();
        tokio::time::sleep(FADE * 2).await;
        assert_eq!(prompt.dismiss_count(), 1);
        assert_eq!(splash.phase(), SplashPhase::Hidden);
        assert_eq!(recovery.runs.load(Ordering::SeqCst), 0);
        assert_eq!(surface.events().last(), Some(&SurfaceEvent::Remove));
    }
}
