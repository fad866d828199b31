//! Caller-driven agent invoker.
//!
//! Exposes the same lifecycle semantics as the runner without owning a
//! thread: the embedder calls `invoke` from its own loop. The invoker is
//! thread-confined by contract, so its flags are plain bools, and the
//! agent type is a generic parameter so the hot path monomorphizes.

use tracing::{debug, warn};

use crate::agent::{Agent, AgentError, ErrorCounter, ErrorHandler, route_error};

/// Invoker errors.
#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    /// The invoker was closed; a closed invoker never starts again.
    #[error("invoker is closed")]
    Closed,

    /// `on_start` failed and the failure was not absorbed by the error
    /// sink. The invoker is closed when this is returned.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Drives an agent's lifecycle from the caller's own loop.
///
/// ```
/// use cadence_core::agent::{Agent, AgentError};
/// use cadence_core::invoker::AgentInvoker;
///
/// struct Noop;
/// impl Agent for Noop {
///     fn name(&self) -> &str {
///         "noop"
///     }
///     fn do_work(&mut self) -> Result<usize, AgentError> {
///         Ok(0)
///     }
/// }
///
/// let mut invoker = AgentInvoker::new(Noop);
/// invoker.start().unwrap();
/// match invoker.invoke() {
///     Ok(_work_count) => {},
///     Err(error) => invoker.handle_error(error).unwrap(),
/// }
/// invoker.close();
/// ```
pub struct AgentInvoker<A: Agent> {
    agent: A,
    handler: Option<ErrorHandler>,
    counter: Option<ErrorCounter>,
    is_started: bool,
    is_running: bool,
    is_closed: bool,
}

impl<A: Agent> AgentInvoker<A> {
    /// Creates an invoker for `agent`.
    #[must_use]
    pub fn new(agent: A) -> Self {
        Self {
            agent,
            handler: None,
            counter: None,
            is_started: false,
            is_running: false,
            is_closed: false,
        }
    }

    /// Installs an error handler invoked before the agent's `on_error`
    /// whenever a failure is routed through the sink.
    #[must_use]
    pub fn with_error_handler(
        mut self,
        handler: impl FnMut(&str, &AgentError) -> Result<(), AgentError> + Send + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Installs a shared failure counter, incremented once per failure
    /// routed through the sink.
    #[must_use]
    pub fn with_error_counter(mut self, counter: ErrorCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Runs `on_start` and marks the invoker running. A second call on a
    /// started invoker is a no-op.
    ///
    /// # Errors
    ///
    /// [`InvokerError::Closed`] after a close. When `on_start` fails the
    /// failure is routed through the error sink and the invoker closes;
    /// the failure is returned unless the sink absorbed it (or it was the
    /// termination sentinel).
    pub fn start(&mut self) -> Result<(), InvokerError> {
        if self.is_closed {
            return Err(InvokerError::Closed);
        }
        if self.is_started {
            return Ok(());
        }
        self.is_started = true;

        match self.agent.on_start() {
            Ok(()) => {
                self.is_running = true;
                debug!(agent = %self.agent.name(), "invoker started");
                Ok(())
            },
            Err(AgentError::Terminated) => {
                self.close();
                Ok(())
            },
            Err(error) => {
                warn!(agent = %self.agent.name(), %error, "agent start failed");
                let routed = route_error(
                    self.counter.as_ref(),
                    self.handler.as_mut(),
                    &mut self.agent,
                    error,
                );
                self.close();
                match routed {
                    Ok(()) | Err(AgentError::Terminated) => Ok(()),
                    Err(unhandled) => Err(InvokerError::Agent(unhandled)),
                }
            },
        }
    }

    /// Runs one work tick, returning the work count. Returns `Ok(0)` when
    /// the invoker is not running.
    ///
    /// # Errors
    ///
    /// Tick failures escape to the caller untouched; feed them to
    /// [`Self::handle_error`].
    pub fn invoke(&mut self) -> Result<usize, AgentError> {
        if !self.is_running {
            return Ok(0);
        }
        self.agent.do_work()
    }

    /// The caller's funnel for failures escaping [`Self::invoke`].
    ///
    /// An interrupt is ignored; the termination sentinel closes the
    /// invoker; anything else is routed through the error sink, closing
    /// on a termination request from the sink.
    ///
    /// # Errors
    ///
    /// Returns the failure when neither the handler nor the agent's
    /// `on_error` absorbed it; the invoker stays running and the caller
    /// decides what to do.
    pub fn handle_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        match error {
            AgentError::Interrupted => Ok(()),
            AgentError::Terminated => {
                self.close();
                Ok(())
            },
            error => {
                let routed = route_error(
                    self.counter.as_ref(),
                    self.handler.as_mut(),
                    &mut self.agent,
                    error,
                );
                match routed {
                    Ok(()) => Ok(()),
                    Err(AgentError::Terminated) => {
                        self.close();
                        Ok(())
                    },
                    Err(unhandled) => Err(unhandled),
                }
            },
        }
    }

    /// Ends the lifecycle: flips the flags and runs `on_close` once if
    /// `on_start` was ever invoked, routing close failures through the
    /// error sink. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_running = false;
        self.is_closed = true;

        if self.is_started {
            if let Err(error) = self.agent.on_close() {
                if !error.is_terminated() {
                    warn!(agent = %self.agent.name(), %error, "agent close failed");
                    let _ = route_error(
                        self.counter.as_ref(),
                        self.handler.as_mut(),
                        &mut self.agent,
                        error,
                    );
                }
            }
            debug!(agent = %self.agent.name(), "invoker closed");
        }
    }

    /// Whether `start` has been called.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.is_started
    }

    /// Whether work ticks are currently accepted.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.is_running
    }

    /// Whether the lifecycle has ended.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// The driven agent.
    #[must_use]
    pub const fn agent(&self) -> &A {
        &self.agent
    }

    /// The driven agent, mutably.
    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }
}

impl<A: Agent> Drop for AgentInvoker<A> {
    fn drop(&mut self) {
        self.close();
    }
}
