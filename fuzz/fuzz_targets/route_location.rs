#![no_main]

use libfuzzer_sys::fuzz_target;
use wsync_core::route::RouteLocation;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (request, name) = text.split_once('\n').unwrap_or((text, "reset"));

    let location = RouteLocation::parse(request);
    let reparsed = RouteLocation::parse(&location.request());
    assert_eq!(location, reparsed, "request() must parse back to itself");

    let stripped = location.without_param(name);
    assert!(!stripped.has_param(name), "{name:?} survived in {stripped}");
    assert_eq!(stripped.path, location.path);
    assert_eq!(stripped.hash, location.hash);

    for (key, _) in stripped.query_pairs() {
        assert!(location.has_param(&key));
    }
});
