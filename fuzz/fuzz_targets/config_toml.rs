#![no_main]

use libfuzzer_sys::fuzz_target;
use wsync_core::config::WsyncConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = WsyncConfig::from_toml_str(text) else {
        return;
    };
    // Anything that validates must survive a round trip through TOML.
    let rendered = config
        .to_toml_string()
        .expect("validated config serializes");
    let again = WsyncConfig::from_toml_str(&rendered).expect("rendered config parses");
    assert_eq!(config, again);
});
