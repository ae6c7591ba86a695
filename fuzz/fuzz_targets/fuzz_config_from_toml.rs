#![no_main]
use libfuzzer_sys::fuzz_target;

use libreprinter::config::{SessionConfig, MIN_END_PAGE_TIMEOUT};

fuzz_target!(|data: &[u8]| {
    let Ok(str) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = SessionConfig::from_toml(str) {
        assert!(config.end_page_timeout >= MIN_END_PAGE_TIMEOUT);
        assert!(!config.handshake_timeout.is_zero());
    }
});
