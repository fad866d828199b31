//! Agent lifecycle contract and error routing.
//!
//! An agent is a cooperative, single-threaded state machine: `on_start`
//! runs once, `do_work` is invoked repeatedly by a runner or invoker, and
//! `on_close` runs once at the end. The framework owns the drive loop; the
//! agent owns the work.

pub mod composite;
pub mod dynamic;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors raised by agent lifecycle methods.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent requested an orderly shutdown of its runner or invoker.
    ///
    /// This is a control-flow sentinel, not a failure: it is never routed
    /// through the error sink and always ends the run cleanly. It may be
    /// raised from any lifecycle method.
    #[error("agent requested termination")]
    Terminated,

    /// The duty cycle was interrupted by an external cancellation request.
    ///
    /// Ends the run and is surfaced to the embedder through the runner's
    /// `close`/`wait` result.
    #[error("duty cycle interrupted")]
    Interrupted,

    /// An ordinary lifecycle failure.
    #[error("{0}")]
    Failed(String),

    /// Failures from several sub-agents of a composite, reported once.
    #[error("{} sub-agent failure(s)", .0.len())]
    Aggregate(Vec<SubAgentFailure>),
}

impl AgentError {
    /// Creates a [`AgentError::Failed`] from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns `true` for the termination sentinel.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// A single sub-agent failure inside an [`AgentError::Aggregate`].
#[derive(Debug, thiserror::Error)]
#[error("{agent}: {error}")]
pub struct SubAgentFailure {
    /// Name of the failing sub-agent.
    pub agent: String,

    /// The failure it raised.
    pub error: AgentError,
}

impl SubAgentFailure {
    /// Creates a failure record for the named sub-agent.
    pub fn new(agent: impl Into<String>, error: AgentError) -> Self {
        Self {
            agent: agent.into(),
            error,
        }
    }
}

/// A long-lived unit of background work driven by a runner or invoker.
///
/// Lifecycle: `on_start` exactly once, then repeated `do_work` ticks, then
/// `on_close` exactly once (whenever `on_start` was invoked, even if it
/// failed). `do_work` must not block; blocking between ticks is the idle
/// strategy's job.
pub trait Agent: Send {
    /// Short identifier used in composite names, thread names, and logs.
    /// Must be cheap.
    fn name(&self) -> &str;

    /// Runs once before the first `do_work` tick, on the worker thread.
    ///
    /// # Errors
    ///
    /// A failure aborts the lifecycle (the run loop never starts);
    /// [`AgentError::Terminated`] aborts it cleanly.
    fn on_start(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Advances one unit of work and reports an approximate work count.
    /// Zero means "nothing to do this tick" and lets the idle strategy
    /// deepen its wait.
    ///
    /// # Errors
    ///
    /// [`AgentError::Terminated`] ends the run cleanly; anything else is
    /// routed through the error sink.
    fn do_work(&mut self) -> Result<usize, AgentError>;

    /// Runs once when the lifecycle ends. Failures are reported through
    /// the error sink but never prevent the close from completing.
    ///
    /// # Errors
    ///
    /// Returns any failure encountered while releasing resources.
    fn on_close(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Invoked when a `do_work` tick failed, after any external error
    /// handler. The default rethrows, so an unhandled failure visibly
    /// propagates out of the run loop.
    ///
    /// # Errors
    ///
    /// Return `Ok(())` to recover and keep ticking, or
    /// [`AgentError::Terminated`] to request an orderly shutdown.
    fn on_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        Err(error)
    }
}

impl<A: Agent + ?Sized> Agent for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_start(&mut self) -> Result<(), AgentError> {
        (**self).on_start()
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        (**self).do_work()
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        (**self).on_close()
    }

    fn on_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        (**self).on_error(error)
    }
}

/// Shared failure counter, incremented once per failure routed through the
/// error sink. Cheap to clone; all clones observe the same count.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter(Arc<AtomicU64>);

impl ErrorCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to the counter.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Callback observing failures before the agent's own `on_error` runs.
///
/// The first argument is the failing agent's name. Returning an error
/// short-circuits the sink; `Err(AgentError::Terminated)` requests an
/// orderly shutdown.
pub type ErrorHandler = Box<dyn FnMut(&str, &AgentError) -> Result<(), AgentError> + Send>;

/// Routes a tick failure through the error sink: counter, then external
/// handler, then the agent's `on_error`.
///
/// `Ok(())` means the failure was absorbed and the duty cycle may
/// continue. `Err(AgentError::Terminated)` requests an orderly shutdown;
/// any other `Err` is unhandled and propagates out of the run loop.
pub(crate) fn route_error(
    counter: Option<&ErrorCounter>,
    handler: Option<&mut ErrorHandler>,
    agent: &mut dyn Agent,
    error: AgentError,
) -> Result<(), AgentError> {
    if let Some(counter) = counter {
        counter.increment();
    }
    if let Some(handler) = handler {
        handler(agent.name(), &error)?;
    }
    agent.on_error(error)
}
