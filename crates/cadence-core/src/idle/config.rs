//! Declarative idle-strategy configuration.
//!
//! Lets embedders choose a strategy from a config file rather than code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::{
    BackoffIdleStrategy, DEFAULT_MAX_PARK_NS, DEFAULT_MAX_SPINS, DEFAULT_MAX_YIELDS,
    DEFAULT_MIN_PARK_NS,
};
use super::{
    BusySpinIdleStrategy, IdleStrategy, NANOS_PER_SECOND, NoOpIdleStrategy, SleepingIdleStrategy,
    YieldingIdleStrategy,
};

/// Idle strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdleConfig {
    /// Do nothing between ticks.
    Noop,

    /// CPU pause hint between ticks.
    BusySpin,

    /// Yield to the OS scheduler between ticks.
    Yield,

    /// Park for a fixed period between ticks.
    Sleep {
        /// Park period; must be under one second.
        #[serde(with = "humantime_serde")]
        period: Duration,
    },

    /// Progressive spin, yield, then exponential-park backoff.
    Backoff {
        /// Ticks spent spinning before yielding.
        #[serde(default = "default_max_spins")]
        max_spins: u64,

        /// Ticks spent yielding before parking.
        #[serde(default = "default_max_yields")]
        max_yields: u64,

        /// Initial park period.
        #[serde(default = "default_min_park")]
        #[serde(with = "humantime_serde")]
        min_park: Duration,

        /// Park period ceiling.
        #[serde(default = "default_max_park")]
        #[serde(with = "humantime_serde")]
        max_park: Duration,
    },
}

const fn default_max_spins() -> u64 {
    DEFAULT_MAX_SPINS
}

const fn default_max_yields() -> u64 {
    DEFAULT_MAX_YIELDS
}

const fn default_min_park() -> Duration {
    Duration::from_nanos(DEFAULT_MIN_PARK_NS)
}

const fn default_max_park() -> Duration {
    Duration::from_nanos(DEFAULT_MAX_PARK_NS)
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self::Backoff {
            max_spins: default_max_spins(),
            max_yields: default_max_yields(),
            min_park: default_min_park(),
            max_park: default_max_park(),
        }
    }
}

impl IdleConfig {
    /// Builds the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration violates a strategy
    /// precondition (sleep period of one second or more, zero or inverted
    /// backoff park bounds).
    pub fn build(&self) -> Result<Box<dyn IdleStrategy>, IdleConfigError> {
        match self {
            Self::Noop => Ok(Box::new(NoOpIdleStrategy)),
            Self::BusySpin => Ok(Box::new(BusySpinIdleStrategy)),
            Self::Yield => Ok(Box::new(YieldingIdleStrategy)),
            Self::Sleep { period } => {
                let nanos = duration_as_nanos(*period);
                if nanos >= NANOS_PER_SECOND {
                    return Err(IdleConfigError::SleepPeriodTooLong(*period));
                }
                Ok(Box::new(SleepingIdleStrategy::new(nanos)))
            },
            Self::Backoff {
                max_spins,
                max_yields,
                min_park,
                max_park,
            } => {
                let min_park_ns = duration_as_nanos(*min_park);
                let max_park_ns = duration_as_nanos(*max_park);
                if min_park_ns == 0 || min_park_ns > max_park_ns {
                    return Err(IdleConfigError::InvalidParkBounds {
                        min: *min_park,
                        max: *max_park,
                    });
                }
                Ok(Box::new(BackoffIdleStrategy::new(
                    *max_spins, *max_yields, min_park_ns, max_park_ns,
                )))
            },
        }
    }
}

fn duration_as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Idle configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum IdleConfigError {
    /// Sleep periods of a second or more belong to a supervisor loop, not
    /// a duty cycle.
    #[error("sleep period must be under one second, got {0:?}")]
    SleepPeriodTooLong(Duration),

    /// Backoff park bounds must satisfy `0 < min <= max`.
    #[error("invalid backoff park bounds: min {min:?}, max {max:?}")]
    InvalidParkBounds {
        /// Configured initial park period.
        min: Duration,
        /// Configured park ceiling.
        max: Duration,
    },
}


mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
