//! Mock construction helpers

use std::time::Duration;
use taslink_rs::backend::{EngineHandle, LinkBackend, MockLink, MockLinkHandle};
use taslink_rs::config::{PlaybackSettings, Settings};

/// Settings with a small prebuffer and no reset hold, for fast tests
pub fn test_settings(prebuffer: usize) -> Settings {
    Settings {
        playback: PlaybackSettings {
            prebuffer,
            latch_high_water: 60,
            reset_hold_ms: 0,
        },
        ..Settings::default()
    }
}

/// Create a backend on a mock link with a short read timeout
pub fn create_test_backend(prebuffer: usize) -> (LinkBackend, EngineHandle, MockLinkHandle) {
    let link = MockLink::new().with_read_timeout(Duration::from_millis(2));
    let mock = link.handle();
    let (backend, handle) = LinkBackend::new(Box::new(link), &test_settings(prebuffer)).unwrap();
    (backend, handle, mock)
}
