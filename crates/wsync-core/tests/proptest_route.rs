//! Property-based tests for route locations and route patterns.
//!
//! Covers request parse/render stability, query parameter stripping, and
//! the reset-on-load pattern's match rule.
//!
//! 5 property tests across 2 proptest! blocks.

use proptest::prelude::*;
use regex::Regex;

use wsync_core::orchestrator::RESET_PATTERN;
use wsync_core::route::RouteLocation;

// =============================================================================
// Strategies
// =============================================================================

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_-]{1,8}", 0..4).prop_map(|segments| {
        let mut path = String::from("/lab");
        for segment in segments {
            path.push('/');
            path.push_str(&segment);
        }
        path
    })
}

/// A raw query parameter: bare flag or key=value.
fn arb_param() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,6}",
        ("[a-z]{1,6}", "[a-z0-9]{0,6}").prop_map(|(k, v)| format!("{k}={v}")),
        Just("reset".to_string()),
        Just("clone=a".to_string()),
    ]
}

fn arb_params() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_param(), 0..6)
}

fn arb_hash() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z0-9]{1,6}".prop_map(|h| format!("#{h}"))]
}

fn render(path: &str, params: &[String], hash: &str) -> String {
    if params.is_empty() {
        format!("{path}{hash}")
    } else {
        format!("{path}?{}{hash}", params.join("&"))
    }
}

// =============================================================================
// Parsing
// =============================================================================

proptest! {
    #[test]
    fn parse_then_render_is_identity(path in arb_path(), params in arb_params(), hash in arb_hash()) {
        let request = render(&path, &params, &hash);
        let location = RouteLocation::parse(&request);
        prop_assert_eq!(location.request(), request);
        prop_assert_eq!(location.path, path);
        prop_assert_eq!(location.hash, hash);
    }

    #[test]
    fn without_param_removes_every_occurrence(path in arb_path(), params in arb_params(), hash in arb_hash()) {
        let location = RouteLocation::parse(&render(&path, &params, &hash));
        let stripped = location.without_param("reset");
        prop_assert!(!stripped.has_param("reset"));
        prop_assert_eq!(&stripped.path, &location.path);
        prop_assert_eq!(&stripped.hash, &location.hash);
    }

    #[test]
    fn without_param_keeps_other_params_in_order(path in arb_path(), params in arb_params()) {
        let location = RouteLocation::parse(&render(&path, &params, ""));
        let expected: Vec<String> = params
            .iter()
            .filter(|p| p.split('=').next() != Some("clone"))
            .cloned()
            .collect();
        prop_assert_eq!(location.without_param("clone").request(), render(&path, &expected, ""));
    }

    #[test]
    fn stripping_a_missing_param_changes_nothing(path in arb_path(), params in arb_params(), hash in arb_hash()) {
        let request = render(&path, &params, &hash);
        let location = RouteLocation::parse(&request);
        prop_assert_eq!(location.without_param("zzzzzzz").request(), request);
    }
}

// =============================================================================
// Reset pattern
// =============================================================================

proptest! {
    #[test]
    fn reset_pattern_matches_only_bare_reset_flag(path in arb_path(), params in arb_params(), hash in arb_hash()) {
        let pattern = Regex::new(RESET_PATTERN).unwrap();
        let request = render(&path, &params, &hash);
        // The flag must be followed by `&` or the end of the request; a
        // trailing fragment hides it.
        let last = params.len().saturating_sub(1);
        let expected = params
            .iter()
            .enumerate()
            .any(|(i, p)| p == "reset" && (i < last || hash.is_empty()));
        prop_assert_eq!(pattern.is_match(&request), expected);
    }
}
