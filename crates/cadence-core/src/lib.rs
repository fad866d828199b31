//! # cadence-core
//!
//! A small concurrency runtime that schedules long-lived background agents
//! on dedicated OS threads. Each agent is a cooperative, single-threaded
//! state machine (start, repeated work ticks, close); the runtime supplies
//! the run loop, lifecycle sequencing, idle/backoff behavior between empty
//! ticks, composition of several agents onto one thread, and error routing
//! with optional counting and handler interception.
//!
//! ## Features
//!
//! - **Runner**: drive an agent's full lifecycle on an owned worker thread
//! - **Invoker**: same lifecycle, but the caller drives the ticks
//! - **Idle strategies**: no-op, busy-spin, yield, park, progressive
//!   backoff, and an externally controlled mode switch
//! - **Composites**: static or dynamically re-memberable groups of agents
//!   sharing one duty cycle
//!
//! ## Example
//!
//! ```rust
//! use cadence_core::agent::{Agent, AgentError};
//! use cadence_core::idle::backoff::BackoffIdleStrategy;
//! use cadence_core::runner::AgentRunner;
//!
//! struct Heartbeat {
//!     beats: usize,
//! }
//!
//! impl Agent for Heartbeat {
//!     fn name(&self) -> &str {
//!         "heartbeat"
//!     }
//!
//!     fn do_work(&mut self) -> Result<usize, AgentError> {
//!         self.beats += 1;
//!         if self.beats == 100 {
//!             return Err(AgentError::Terminated);
//!         }
//!         Ok(1)
//!     }
//! }
//!
//! let mut runner = AgentRunner::new(BackoffIdleStrategy::default(), Heartbeat { beats: 0 });
//! runner.start_on_thread().unwrap();
//! runner.wait().unwrap();
//! assert!(runner.is_closed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod idle;
pub mod invoker;
pub mod park;
pub mod runner;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::agent::composite::CompositeAgent;
    pub use crate::agent::dynamic::{DynamicCompositeAgent, DynamicCompositeController};
    pub use crate::agent::{Agent, AgentError, ErrorCounter};
    pub use crate::idle::backoff::BackoffIdleStrategy;
    pub use crate::idle::{IdleStrategy, NoOpIdleStrategy, SleepingIdleStrategy};
    pub use crate::invoker::AgentInvoker;
    pub use crate::runner::AgentRunner;
}

/// Re-export commonly used types at the crate root.
pub use agent::{Agent, AgentError, ErrorCounter};
pub use idle::IdleStrategy;
pub use invoker::AgentInvoker;
pub use runner::AgentRunner;
