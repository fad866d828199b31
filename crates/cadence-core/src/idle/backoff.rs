//! Progressive backoff idle strategy.
//!
//! Escalates across consecutive empty ticks: spin first (lowest latency),
//! then yield, then park with an exponentially growing period. A single
//! productive tick drops the whole ladder back to the start.

use crossbeam_utils::CachePadded;

use super::IdleStrategy;
use crate::park::park_nanos;

/// Default maximum number of spinning ticks.
pub const DEFAULT_MAX_SPINS: u64 = 10;

/// Default maximum number of yielding ticks.
pub const DEFAULT_MAX_YIELDS: u64 = 5;

/// Default initial park period: 1 microsecond.
pub const DEFAULT_MIN_PARK_NS: u64 = 1_000;

/// Default park period ceiling: 1 millisecond.
pub const DEFAULT_MAX_PARK_NS: u64 = 1_000_000;

/// Position on the backoff ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    /// Fresh or just reset; no empty tick seen yet.
    NotIdle,
    /// Busy-spinning with a CPU pause hint.
    Spinning,
    /// Yielding to the OS scheduler.
    Yielding,
    /// Parking with a doubling period. Only a productive tick leaves this
    /// state.
    Parking,
}

impl std::fmt::Display for BackoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotIdle => write!(f, "not_idle"),
            Self::Spinning => write!(f, "spinning"),
            Self::Yielding => write!(f, "yielding"),
            Self::Parking => write!(f, "parking"),
        }
    }
}

/// Mutable ladder position. Kept in one padded block so neighboring
/// allocations cannot share its cache line from either side.
#[derive(Debug)]
struct BackoffCounters {
    state: BackoffState,
    spins: u64,
    yields: u64,
    park_period_ns: u64,
}

/// Idle strategy escalating spin → yield → exponential park.
///
/// The park period starts at `min_park_ns` when parking is entered and
/// doubles on every parked tick, capped at `max_park_ns`.
#[derive(Debug)]
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park_ns: u64,
    max_park_ns: u64,
    counters: CachePadded<BackoffCounters>,
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_SPINS,
            DEFAULT_MAX_YIELDS,
            DEFAULT_MIN_PARK_NS,
            DEFAULT_MAX_PARK_NS,
        )
    }
}

impl BackoffIdleStrategy {
    /// Creates a strategy with explicit ladder bounds.
    ///
    /// # Panics
    ///
    /// Panics if `min_park_ns` is zero or exceeds `max_park_ns`.
    #[must_use]
    pub fn new(max_spins: u64, max_yields: u64, min_park_ns: u64, max_park_ns: u64) -> Self {
        assert!(min_park_ns > 0, "min park period must be non-zero");
        assert!(
            min_park_ns <= max_park_ns,
            "min park period {min_park_ns}ns exceeds max {max_park_ns}ns"
        );
        Self {
            max_spins,
            max_yields,
            min_park_ns,
            max_park_ns,
            counters: CachePadded::new(BackoffCounters {
                state: BackoffState::NotIdle,
                spins: 0,
                yields: 0,
                park_period_ns: 0,
            }),
        }
    }

    /// Current ladder state.
    #[must_use]
    pub fn state(&self) -> BackoffState {
        self.counters.state
    }

    /// Spinning ticks observed since the last reset.
    #[must_use]
    pub fn spins(&self) -> u64 {
        self.counters.spins
    }

    /// Yielding ticks observed since the last reset.
    #[must_use]
    pub fn yields(&self) -> u64 {
        self.counters.yields
    }

    /// The next park period in nanoseconds; zero until parking has been
    /// entered or the strategy reset.
    #[must_use]
    pub fn park_period_ns(&self) -> u64 {
        self.counters.park_period_ns
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self) {
        let counters = &mut *self.counters;
        match counters.state {
            BackoffState::NotIdle => {
                counters.state = BackoffState::Spinning;
                counters.spins = 1;
            },
            BackoffState::Spinning => {
                std::hint::spin_loop();
                counters.spins += 1;
                if counters.spins > self.max_spins {
                    counters.state = BackoffState::Yielding;
                    counters.yields = 0;
                }
            },
            BackoffState::Yielding => {
                counters.yields += 1;
                if counters.yields > self.max_yields {
                    counters.state = BackoffState::Parking;
                    counters.park_period_ns = self.min_park_ns;
                } else {
                    std::thread::yield_now();
                }
            },
            BackoffState::Parking => {
                park_nanos(counters.park_period_ns);
                counters.park_period_ns =
                    counters.park_period_ns.saturating_mul(2).min(self.max_park_ns);
            },
        }
    }

    fn reset(&mut self) {
        let counters = &mut *self.counters;
        counters.state = BackoffState::NotIdle;
        counters.spins = 0;
        counters.yields = 0;
        counters.park_period_ns = self.min_park_ns;
    }

    fn alias(&self) -> &'static str {
        "backoff"
    }
}
