//! Property-based tests for the splash reference count.
//!
//! Covers the count never underflowing under repeated disposal and the
//! surface being removed exactly when every show has been released.
//!
//! 2 property tests across 1 proptest! block.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use wsync_core::prompt::ScriptedPrompt;
use wsync_core::splash::{RecordingSurface, SplashPhase, SplashScreen, SurfaceEvent};

const FADE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
enum Op {
    Show,
    /// Dispose the handle at this index (modulo the number of handles).
    Dispose(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            2 => Just(Op::Show),
            3 => (0usize..16).prop_map(Op::Dispose),
        ],
        1..32,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn count_tracks_undisposed_handles(ops in arb_ops()) {
        runtime().block_on(async {
            let surface = Arc::new(RecordingSurface::new());
            let splash = SplashScreen::new(
                surface.clone(),
                Arc::new(ScriptedPrompt::new()),
                Duration::from_secs(12),
                FADE,
            );
            let mut handles = Vec::new();
            for op in &ops {
                match op {
                    Op::Show => handles.push(splash.show(async {})),
                    Op::Dispose(i) if !handles.is_empty() => {
                        let index = i % handles.len();
                        handles[index].dispose();
                    }
                    Op::Dispose(_) => {}
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                let live = handles.iter().filter(|h| !h.is_disposed()).count();
                prop_assert_eq!(splash.count(), live);
            }
            Ok(())
        })?;
    }

    #[test]
    fn surface_removed_iff_everything_released(ops in arb_ops()) {
        runtime().block_on(async {
            let surface = Arc::new(RecordingSurface::new());
            let splash = SplashScreen::new(
                surface.clone(),
                Arc::new(ScriptedPrompt::new()),
                Duration::from_secs(12),
                FADE,
            );
            let mut handles = Vec::new();
            for op in &ops {
                match op {
                    Op::Show => handles.push(splash.show(async {})),
                    Op::Dispose(i) if !handles.is_empty() => {
                        let index = i % handles.len();
                        handles[index].dispose();
                    }
                    Op::Dispose(_) => {}
                }
            }
            tokio::time::sleep(FADE * 2).await;

            let shown = !handles.is_empty();
            let released = handles.iter().all(|h| h.is_disposed());
            let removed = surface.events().last() == Some(&SurfaceEvent::Remove);
            prop_assert_eq!(removed, shown && released);
            prop_assert_eq!(splash.phase() == SplashPhase::Hidden, !shown || released);
            if removed {
                prop_assert!(!splash.is_escalation_armed());
            }
            Ok(())
        })?;
    }
}
