//! Thread parking primitive.
//!
//! Suspends the calling OS thread for a bounded period without going
//! through any user-space cooperative scheduler. The deepest wait of the
//! backoff idle strategy lands here, so the wait must be a plain OS-level
//! block on the worker thread.

use std::time::Duration;

/// Nanoseconds per millisecond.
#[cfg(windows)]
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Parks the current thread for approximately `nanos` nanoseconds.
///
/// The wait is an OS-level timed block (`std::thread::park_timeout`). It
/// may end early: the OS can preempt the timer, and a pending unpark token
/// on the thread is consumed immediately. Callers must tolerate short
/// resumption; the runner relies on [`std::thread::Thread::unpark`] to cut
/// a long park short when shutting a worker down.
///
/// On Windows the period is quantized up to whole milliseconds (at least
/// one), matching the granularity the OS timer delivers.
pub fn park_nanos(nanos: u64) {
    #[cfg(windows)]
    let timeout = Duration::from_millis(nanos.div_ceil(NANOS_PER_MILLI).max(1));
    #[cfg(not(windows))]
    let timeout = Duration::from_nanos(nanos);

    std::thread::park_timeout(timeout);
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_park_returns() {
        // Smoke test: a short park completes and does not hang.
        let start = Instant::now();
        park_nanos(100_000); // 100us
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_park_woken_by_unpark() {
        let main = std::thread::current();
        let handle = std::thread::spawn(move || {
            main.unpark();
        });
        let start = Instant::now();
        // 10s park, cut short by the unpark from the helper thread (or by a
        // token the helper already deposited).
        park_nanos(10_000_000_000);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
