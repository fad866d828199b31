//! Externally controlled idle strategy.
//!
//! The mode lives in a shared indicator OUTSIDE the strategy, so a
//! supervisor thread can retune a worker's idle behavior at runtime
//! without synchronizing with it: the worker picks up the new mode on its
//! next empty tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use super::IdleStrategy;
use crate::park::park_nanos;

/// Park period used by [`ControlledIdleMode::Park`]: 1 microsecond.
pub const CONTROLLED_PARK_NS: u64 = 1_000;

/// Idle behavior selected through an [`IdleModeIndicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ControlledIdleMode {
    /// No supervisor has chosen yet; behaves like [`Self::Park`].
    #[default]
    NotControlled = 0,
    /// Do nothing on idle.
    Noop = 1,
    /// CPU pause hint on idle.
    BusySpin = 2,
    /// Yield to the OS scheduler on idle.
    Yield = 3,
    /// Park for a fixed microsecond on idle.
    Park = 4,
}

impl ControlledIdleMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Noop,
            2 => Self::BusySpin,
            3 => Self::Yield,
            4 => Self::Park,
            _ => Self::NotControlled,
        }
    }
}

impl std::fmt::Display for ControlledIdleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotControlled => write!(f, "not_controlled"),
            Self::Noop => write!(f, "noop"),
            Self::BusySpin => write!(f, "busy_spin"),
            Self::Yield => write!(f, "yield"),
            Self::Park => write!(f, "park"),
        }
    }
}

/// Shared, cloneable mode indicator.
///
/// Writes use release ordering and reads acquire, so a mode change made by
/// one thread is visible to the worker on its next `idle()`. No ordering
/// between consecutive writes is promised beyond that.
#[derive(Debug, Clone, Default)]
pub struct IdleModeIndicator(Arc<AtomicU8>);

impl IdleModeIndicator {
    /// Creates an indicator in [`ControlledIdleMode::NotControlled`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new mode.
    pub fn set(&self, mode: ControlledIdleMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    /// Reads the current mode.
    #[must_use]
    pub fn get(&self) -> ControlledIdleMode {
        ControlledIdleMode::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Idle strategy dispatching on a shared [`IdleModeIndicator`].
#[derive(Debug)]
pub struct ControllableIdleStrategy {
    indicator: IdleModeIndicator,
}

impl ControllableIdleStrategy {
    /// Creates a strategy reading `indicator` on every empty tick. The
    /// caller keeps a clone of the indicator to steer the strategy.
    #[must_use]
    pub const fn new(indicator: IdleModeIndicator) -> Self {
        Self { indicator }
    }

    /// The indicator this strategy follows.
    #[must_use]
    pub const fn indicator(&self) -> &IdleModeIndicator {
        &self.indicator
    }
}

impl IdleStrategy for ControllableIdleStrategy {
    fn idle(&mut self) {
        match self.indicator.get() {
            ControlledIdleMode::Noop => {},
            ControlledIdleMode::BusySpin => std::hint::spin_loop(),
            ControlledIdleMode::Yield => std::thread::yield_now(),
            ControlledIdleMode::Park | ControlledIdleMode::NotControlled => {
                park_nanos(CONTROLLED_PARK_NS);
            },
        }
    }

    fn alias(&self) -> &'static str {
        "controllable"
    }
}
