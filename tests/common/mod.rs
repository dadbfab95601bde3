//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Poll `condition` until it holds or the test timeout passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + test_timeout();
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
