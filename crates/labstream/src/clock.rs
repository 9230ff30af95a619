// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic clock for timestamps and result aging.
//!
//! All discovery timestamps are seconds on a monotonic axis anchored at the
//! first use inside this process. Wall-clock jumps (NTP, manual adjustment)
//! never affect wave pacing or result aging.

use std::sync::OnceLock;
use std::time::Instant;

/// Sentinel duration treated as "never" / "unbounded" (roughly one year).
pub const FOREVER: f64 = 32_000_000.0;

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Current monotonic time in seconds.
///
/// The value is non-decreasing across threads for the lifetime of the
/// process. Sub-microsecond resolution on all supported platforms.
pub fn local_clock() -> f64 {
    anchor().elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_monotonic() {
        let t0 = local_clock();
        let t1 = local_clock();
        assert!(t1 >= t0);
    }

    #[test]
    fn test_clock_advances() {
        let t0 = local_clock();
        thread::sleep(Duration::from_millis(20));
        let t1 = local_clock();
        assert!(t1 - t0 >= 0.015, "expected >= 15ms, got {}s", t1 - t0);
    }

    #[test]
    fn test_forever_is_far_away() {
        assert!(local_clock() + 1e6 < FOREVER);
    }
}
