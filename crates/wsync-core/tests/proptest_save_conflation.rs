//! Property-based tests for the save coordinator.
//!
//! Covers conflation of bursts into one write, latest-snapshot payloads,
//! shared outcomes, and quiet-period restarts.
//!
//! 3 property tests across 1 proptest! block.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use wsync_core::WindowIdentity;
use wsync_core::remote::MemoryWorkspaceService;
use wsync_core::save::SaveCoordinator;
use wsync_core::state_db::StateDb;
use wsync_core::storage::MemoryStorage;
use wsync_core::transform::{TransformDirective, TransformGate};

const DEBOUNCE: Duration = Duration::from_millis(750);

// =============================================================================
// Strategies
// =============================================================================

/// One request: a key/value written just before it, and the immediate flag.
fn arb_request() -> impl Strategy<Value = (String, i64, bool)> {
    ("[a-e]", any::<i64>(), prop::bool::weighted(0.2))
}

fn arb_burst() -> impl Strategy<Value = Vec<(String, i64, bool)>> {
    prop::collection::vec(arb_request(), 1..16)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

fn pipeline() -> (Arc<StateDb>, Arc<MemoryWorkspaceService>, SaveCoordinator) {
    let gate = TransformGate::new();
    gate.supply(TransformDirective::Cancel).unwrap();
    let store = Arc::new(StateDb::new("wsync", Arc::new(MemoryStorage::new()), gate));
    let service = Arc::new(MemoryWorkspaceService::new());
    let saves = SaveCoordinator::new(
        Arc::clone(&store),
        service.clone(),
        WindowIdentity::new("proj1"),
        DEBOUNCE,
    );
    (store, service, saves)
}

// =============================================================================
// Conflation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn burst_produces_one_write_with_latest_snapshot(burst in arb_burst()) {
        runtime().block_on(async {
            let (store, service, saves) = pipeline();
            let mut expected = Map::new();
            let mut waiters = Vec::new();
            for (key, value, immediate) in &burst {
                store.save(key, json!(value)).await;
                expected.insert(key.clone(), json!(value));
                waiters.push(saves.request_save(*immediate));
            }
            for waiter in waiters {
                prop_assert!(waiter.await.is_ok());
            }
            prop_assert_eq!(service.save_count(), 1);
            prop_assert_eq!(service.get("proj1").unwrap().data, Value::Object(expected));
            Ok(())
        })?;
    }

    #[test]
    fn gaps_shorter_than_debounce_keep_one_token(gaps in prop::collection::vec(0u64..700, 1..8)) {
        runtime().block_on(async {
            let (_store, service, saves) = pipeline();
            let mut waiters = vec![saves.request_save(false)];
            for gap in &gaps {
                tokio::time::sleep(Duration::from_millis(*gap)).await;
                prop_assert_eq!(service.save_count(), 0);
                waiters.push(saves.request_save(false));
            }
            for waiter in waiters {
                prop_assert!(waiter.await.is_ok());
            }
            prop_assert_eq!(service.save_count(), 1);
            Ok(())
        })?;
    }

    #[test]
    fn separate_windows_write_separately(windows in 1usize..5) {
        runtime().block_on(async {
            let (store, service, saves) = pipeline();
            for i in 0..windows {
                store.save("n", json!(i)).await;
                prop_assert!(saves.request_save(false).await.is_ok());
            }
            prop_assert_eq!(service.save_count(), windows);
            prop_assert_eq!(service.get("proj1").unwrap().data, json!({"n": windows - 1}));
            Ok(())
        })?;
    }
}
