//! Duty-cycle runner.
//!
//! Owns one agent and one idle strategy, drives the full lifecycle on a
//! dedicated worker thread, and supports safe external shutdown. Lifecycle
//! flags are shared atomics: reads acquire, writes release, and the
//! single-shot start gate is a compare-and-set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError, ErrorCounter, ErrorHandler, route_error};
use crate::idle::IdleStrategy;
use crate::park::park_nanos;

/// How long `close` waits for the worker to wind down on its own before
/// escalating to an interrupt.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between completion checks while closing.
const CLOSE_POLL_NS: u64 = 200_000;

/// Runner errors.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runner was already started; the start gate is single-shot.
    #[error("runner already started")]
    AlreadyStarted,

    /// The runner was closed; a closed runner never starts again.
    #[error("runner is closed")]
    Closed,

    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker ended with an agent failure, or was interrupted by an
    /// escalated close.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Lifecycle flags shared between the runner handle and its worker.
struct RunnerState {
    /// Single-shot start gate; latches on first start and never resets.
    is_started: AtomicBool,
    /// True from just before `on_start` until the lifecycle winds down or
    /// shutdown is requested.
    is_running: AtomicBool,
    /// Latched by an external `close` request and, finally, by the worker
    /// once `on_close` has completed.
    is_closed: AtomicBool,
    /// Interrupt request; the worker translates it into a clean stop and
    /// surfaces [`AgentError::Interrupted`].
    interrupted: AtomicBool,
    /// The worker's thread handle, for unparking during an escalated
    /// close.
    worker: Mutex<Option<Thread>>,
}

impl RunnerState {
    fn new() -> Self {
        Self {
            is_started: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            is_closed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Requests an interrupt and kicks the worker out of any park.
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = worker.as_ref() {
            worker.unpark();
        }
    }
}

/// Everything the worker thread takes ownership of at start.
struct Startup {
    strategy: Box<dyn IdleStrategy>,
    agent: Box<dyn Agent>,
    handler: Option<ErrorHandler>,
    counter: Option<ErrorCounter>,
}

/// Drives an agent's full lifecycle on a dedicated OS thread.
///
/// The runner exclusively owns the agent and the idle strategy for the
/// thread's lifetime. Start is single-shot; a closed runner is terminal.
pub struct AgentRunner {
    state: Arc<RunnerState>,
    startup: Option<Startup>,
    handle: Option<JoinHandle<Result<(), AgentError>>>,
    agent_name: String,
}

impl AgentRunner {
    /// Creates a runner for `agent`, idling with `idle_strategy` between
    /// empty ticks.
    #[must_use]
    pub fn new(idle_strategy: impl IdleStrategy + 'static, agent: impl Agent + 'static) -> Self {
        let agent_name = agent.name().to_string();
        Self {
            state: Arc::new(RunnerState::new()),
            startup: Some(Startup {
                strategy: Box::new(idle_strategy),
                agent: Box::new(agent),
                handler: None,
                counter: None,
            }),
            handle: None,
            agent_name,
        }
    }

    /// Installs an error handler invoked before the agent's `on_error`
    /// whenever a lifecycle failure is routed through the sink.
    ///
    /// # Panics
    ///
    /// Panics if the runner has already started.
    #[must_use]
    pub fn with_error_handler(
        mut self,
        handler: impl FnMut(&str, &AgentError) -> Result<(), AgentError> + Send + 'static,
    ) -> Self {
        let startup = self
            .startup
            .as_mut()
            .expect("error handler must be installed before start");
        startup.handler = Some(Box::new(handler));
        self
    }

    /// Installs a shared failure counter, incremented once per failure
    /// routed through the sink.
    ///
    /// # Panics
    ///
    /// Panics if the runner has already started.
    #[must_use]
    pub fn with_error_counter(mut self, counter: ErrorCounter) -> Self {
        let startup = self
            .startup
            .as_mut()
            .expect("error counter must be installed before start");
        startup.counter = Some(counter);
        self
    }

    /// Spawns the worker thread and returns immediately; the spawned
    /// thread runs `on_start`, the duty-cycle loop, and `on_close`.
    /// Callers that need to observe the agent running must poll
    /// [`Self::is_running`].
    ///
    /// # Errors
    ///
    /// [`RunnerError::Closed`] after a close, [`RunnerError::AlreadyStarted`]
    /// on a second start, [`RunnerError::Spawn`] when the OS refuses the
    /// thread.
    pub fn start_on_thread(&mut self) -> Result<(), RunnerError> {
        self.start_inner(None)
    }

    /// Like [`Self::start_on_thread`], additionally pinning the worker to
    /// CPU `core` (Linux; elsewhere the pin is skipped with a warning).
    ///
    /// # Errors
    ///
    /// As [`Self::start_on_thread`]; a failed pin only logs a warning.
    pub fn start_on_thread_pinned(&mut self, core: usize) -> Result<(), RunnerError> {
        self.start_inner(Some(core))
    }

    fn start_inner(&mut self, core: Option<usize>) -> Result<(), RunnerError> {
        if self.state.is_closed.load(Ordering::Acquire) {
            return Err(RunnerError::Closed);
        }
        if self
            .state
            .is_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RunnerError::AlreadyStarted);
        }
        let Some(startup) = self.startup.take() else {
            return Err(RunnerError::AlreadyStarted);
        };

        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name(format!("cadence-agent-{}", self.agent_name))
            .spawn(move || worker_run(core, startup, &state))?;
        self.handle = Some(handle);

        debug!(agent = %self.agent_name, "worker thread spawned");
        Ok(())
    }

    /// Shuts the runner down with [`DEFAULT_CLOSE_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// See [`Self::close_timeout`].
    pub fn close(&mut self) -> Result<(), RunnerError> {
        self.close_timeout(DEFAULT_CLOSE_TIMEOUT)
    }

    /// Requests shutdown and waits for the worker to finish.
    ///
    /// Stops the duty cycle, waits up to `timeout` for the worker to wind
    /// down on its own, then escalates: the worker is interrupted and
    /// unparked until it exits. Once this returns, `on_close` has
    /// completed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the worker's terminal failure, if any;
    /// [`AgentError::Interrupted`] when the escalation path fired.
    pub fn close_timeout(&mut self, timeout: Duration) -> Result<(), RunnerError> {
        // Close before any start: latch both gates so no worker ever runs.
        if self
            .state
            .is_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.state.is_closed.store(true, Ordering::Release);
            return Ok(());
        }

        let Some(handle) = self.handle.take() else {
            // Already closed (or another close is in flight); nothing to
            // wait for.
            return Ok(());
        };

        self.state.is_closed.store(true, Ordering::Release);
        self.state.is_running.store(false, Ordering::Release);

        let deadline = Instant::now() + timeout;
        let mut escalated = false;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                if !escalated {
                    warn!(agent = %self.agent_name, ?timeout, "close timed out; interrupting worker");
                    escalated = true;
                }
                self.state.interrupt();
            }
            park_nanos(CLOSE_POLL_NS);
        }

        join_worker(&self.agent_name, handle)
    }

    /// Blocks until the worker finishes its lifecycle and returns the
    /// worker's terminal result. Returns immediately when the worker has
    /// already been joined (or never started).
    ///
    /// # Errors
    ///
    /// The worker's terminal failure, if any.
    pub fn wait(&mut self) -> Result<(), RunnerError> {
        match self.handle.take() {
            Some(handle) => join_worker(&self.agent_name, handle),
            None => Ok(()),
        }
    }

    /// Name of the agent this runner drives.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Whether the duty cycle is currently live. After `start_on_thread`
    /// returns this may still be false until the worker gets scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running.load(Ordering::Acquire)
    }

    /// Whether the runner has been started (latches on first start).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.is_started.load(Ordering::Acquire)
    }

    /// Whether the lifecycle has ended or a close has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed.load(Ordering::Acquire)
    }

    /// The complement of [`Self::is_closed`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        // Best-effort shutdown for runners dropped while live.
        if self.state.is_started.load(Ordering::Acquire) && !self.state.is_closed.load(Ordering::Acquire)
        {
            let _ = self.close_timeout(DEFAULT_CLOSE_TIMEOUT);
        }
    }
}

/// Joins the worker thread, mapping its terminal result.
fn join_worker(
    agent_name: &str,
    handle: JoinHandle<Result<(), AgentError>>,
) -> Result<(), RunnerError> {
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(RunnerError::Agent(error)),
        Err(_) => {
            warn!(agent = %agent_name, "worker thread panicked");
            Err(RunnerError::Agent(AgentError::failed(
                "worker thread panicked",
            )))
        },
    }
}

/// The worker thread body: full lifecycle for one agent.
fn worker_run(core: Option<usize>, startup: Startup, state: &RunnerState) -> Result<(), AgentError> {
    let Startup {
        mut strategy,
        mut agent,
        mut handler,
        counter,
    } = startup;

    *state.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current());
    if let Some(core) = core {
        pin_to_core(core);
    }

    state.is_running.store(true, Ordering::Release);
    debug!(agent = %agent.name(), idle = strategy.alias(), "agent lifecycle starting");

    let mut terminal = Ok(());
    match agent.on_start() {
        Ok(()) => {
            terminal = duty_cycle(
                state,
                strategy.as_mut(),
                agent.as_mut(),
                &mut handler,
                counter.as_ref(),
            );
        },
        Err(AgentError::Terminated) => {
            state.is_running.store(false, Ordering::Release);
        },
        Err(error) => {
            state.is_running.store(false, Ordering::Release);
            warn!(agent = %agent.name(), %error, "agent start failed");
            match route_error(counter.as_ref(), handler.as_mut(), agent.as_mut(), error) {
                Ok(()) | Err(AgentError::Terminated) => {},
                Err(unhandled) => terminal = Err(unhandled),
            }
        },
    }

    // on_close runs whenever on_start was invoked, even after failures;
    // its own failures are reported but never block close completion.
    if let Err(error) = agent.on_close() {
        if !error.is_terminated() {
            warn!(agent = %agent.name(), %error, "agent close failed");
            match route_error(counter.as_ref(), handler.as_mut(), agent.as_mut(), error) {
                Ok(()) | Err(AgentError::Terminated) => {},
                Err(unhandled) => {
                    if terminal.is_ok() {
                        terminal = Err(unhandled);
                    }
                },
            }
        }
    }

    state.is_running.store(false, Ordering::Release);
    state.is_closed.store(true, Ordering::Release);
    info!(agent = %agent.name(), "agent lifecycle complete");
    terminal
}

/// The inner work loop: tick, then idle, until shutdown or a propagating
/// failure.
fn duty_cycle(
    state: &RunnerState,
    strategy: &mut dyn IdleStrategy,
    agent: &mut dyn Agent,
    handler: &mut Option<ErrorHandler>,
    counter: Option<&ErrorCounter>,
) -> Result<(), AgentError> {
    while state.is_running.load(Ordering::Acquire) {
        if state.interrupted.load(Ordering::Acquire) {
            state.is_running.store(false, Ordering::Release);
            return Err(AgentError::Interrupted);
        }
        match agent.do_work() {
            Ok(work_count) => strategy.idle_work(work_count),
            Err(AgentError::Terminated) => {
                state.is_running.store(false, Ordering::Release);
            },
            Err(AgentError::Interrupted) => {
                state.is_running.store(false, Ordering::Release);
                return Err(AgentError::Interrupted);
            },
            Err(error) => match route_error(counter, handler.as_mut(), agent, error) {
                Ok(()) => {},
                Err(AgentError::Terminated) => {
                    state.is_running.store(false, Ordering::Release);
                },
                Err(unhandled) => return Err(unhandled),
            },
        }
    }
    // An interrupt delivered mid-tick lands here once the loop predicate
    // flips; it must still surface to the embedder.
    if state.interrupted.load(Ordering::Acquire) {
        return Err(AgentError::Interrupted);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    if cpu_set.set(core).is_err() {
        warn!(core, "core index out of range; worker left unpinned");
        return;
    }
    // Pid 0 targets the calling thread.
    if let Err(errno) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        warn!(core, %errno, "failed to pin worker thread");
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(core: usize) {
    warn!(core, "thread pinning is not supported on this platform");
}
