//! Dynamic composition of agents onto one duty cycle.
//!
//! Membership changes are requested from any thread but applied inside
//! `do_work` on the owning worker thread, so the member list itself needs
//! no synchronization. Requests go through two single-slot queues: one
//! pending add, one pending remove. A declined `try_*` is the caller's
//! backpressure signal; the slots are deliberately not queues.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Agent, AgentError, SubAgentFailure};

/// Lifecycle status of a [`DynamicCompositeAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompositeStatus {
    /// Constructed but not yet started.
    Init = 0,
    /// Started; membership requests are accepted.
    Active = 1,
    /// Closed; terminal.
    Closed = 2,
}

impl CompositeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Closed,
            _ => Self::Init,
        }
    }
}

impl std::fmt::Display for CompositeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// The two pending membership slots.
#[derive(Default)]
struct PendingSlots {
    add: Option<Box<dyn Agent>>,
    remove: Option<String>,
}

/// State shared between the composite (worker side) and its controllers.
struct Shared {
    status: AtomicU8,
    pending: Mutex<PendingSlots>,
}

impl Shared {
    fn status(&self) -> CompositeStatus {
        CompositeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn pending(&self) -> MutexGuard<'_, PendingSlots> {
        // The lock only ever swaps two Options, so a poisoned guard still
        // holds consistent data.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_active(&self, operation: &str) {
        let status = self.status();
        assert!(
            status == CompositeStatus::Active,
            "{operation} requires an active dynamic composite (status: {status})"
        );
    }

    fn try_add(&self, agent: Box<dyn Agent>) -> Result<(), Box<dyn Agent>> {
        self.require_active("try_add");
        let mut slots = self.pending();
        if slots.add.is_some() {
            return Err(agent);
        }
        slots.add = Some(agent);
        Ok(())
    }

    fn try_remove(&self, name: &str) -> bool {
        self.require_active("try_remove");
        let mut slots = self.pending();
        if slots.remove.is_some() {
            return false;
        }
        slots.remove = Some(name.to_string());
        true
    }

    fn has_add_completed(&self) -> bool {
        self.require_active("has_add_completed");
        self.pending().add.is_none()
    }

    fn has_remove_completed(&self) -> bool {
        self.require_active("has_remove_completed");
        self.pending().remove.is_none()
    }
}

/// Cloneable external handle to a [`DynamicCompositeAgent`].
///
/// Obtain one with [`DynamicCompositeAgent::controller`] before the agent
/// moves into a runner; the handle stays valid for the agent's whole
/// lifetime and is the way other threads request membership changes.
#[derive(Clone)]
pub struct DynamicCompositeController {
    shared: Arc<Shared>,
}

impl DynamicCompositeController {
    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> CompositeStatus {
        self.shared.status()
    }

    /// Requests that `agent` join the composite. Accepted requests are
    /// applied (and the newcomer started) by the next `do_work` on the
    /// worker thread.
    ///
    /// # Errors
    ///
    /// Hands `agent` back when a previous add is still pending; retry
    /// after [`Self::has_add_completed`] reports true.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is active.
    pub fn try_add(&self, agent: Box<dyn Agent>) -> Result<(), Box<dyn Agent>> {
        self.shared.try_add(agent)
    }

    /// Requests removal of the member named `name`. The departing agent is
    /// closed by the next `do_work` on the worker thread. Returns `false`
    /// when a previous removal is still pending.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is active.
    pub fn try_remove(&self, name: &str) -> bool {
        self.shared.try_remove(name)
    }

    /// Whether the last accepted add has been applied.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is active.
    #[must_use]
    pub fn has_add_completed(&self) -> bool {
        self.shared.has_add_completed()
    }

    /// Whether the last accepted removal has been applied.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is active.
    #[must_use]
    pub fn has_remove_completed(&self) -> bool {
        self.shared.has_remove_completed()
    }
}

/// An agent driving an ordered set of sub-agents whose membership can
/// change while it runs.
///
/// Only the worker thread touches the member list; external threads go
/// through a [`DynamicCompositeController`]. Members are identified by
/// [`Agent::name`], which therefore should be unique within one composite.
pub struct DynamicCompositeAgent {
    name: String,
    agents: Vec<Box<dyn Agent>>,
    shared: Arc<Shared>,
}

impl DynamicCompositeAgent {
    /// Creates a composite with an initial (possibly empty) member list.
    #[must_use]
    pub fn new(name: impl Into<String>, agents: Vec<Box<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            agents,
            shared: Arc::new(Shared {
                status: AtomicU8::new(CompositeStatus::Init as u8),
                pending: Mutex::new(PendingSlots::default()),
            }),
        }
    }

    /// Returns an external handle for membership requests and status
    /// checks. Take one before moving the agent into a runner.
    #[must_use]
    pub fn controller(&self) -> DynamicCompositeController {
        DynamicCompositeController {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> CompositeStatus {
        self.shared.status()
    }

    /// Number of current members. Worker-side view; only meaningful on the
    /// driving thread.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the member list is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Starts a newly added member, closing it again if the start fails
    /// and recording both failures.
    fn start_new_member(&mut self, mut agent: Box<dyn Agent>, failures: &mut Vec<SubAgentFailure>) {
        match agent.on_start() {
            Ok(()) => self.agents.push(agent),
            Err(start_error) => {
                let name = agent.name().to_string();
                failures.push(SubAgentFailure::new(name.clone(), start_error));
                if let Err(close_error) = agent.on_close() {
                    failures.push(SubAgentFailure::new(name, close_error));
                }
            },
        }
    }
}

impl Agent for DynamicCompositeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) -> Result<(), AgentError> {
        let mut failures = Vec::new();
        for agent in &mut self.agents {
            if let Err(error) = agent.on_start() {
                failures.push(SubAgentFailure::new(agent.name(), error));
            }
        }
        self.shared
            .status
            .store(CompositeStatus::Active as u8, Ordering::Release);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Aggregate(failures))
        }
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        // Drain both slots under the lock, apply them outside it. Both
        // drained requests must be applied this cycle: the slots are
        // already empty, so a skipped one would be lost for good.
        let (pending_add, pending_remove) = {
            let mut slots = self.shared.pending();
            (slots.add.take(), slots.remove.take())
        };

        let mut failures = Vec::new();
        if let Some(agent) = pending_add {
            self.start_new_member(agent, &mut failures);
        }

        if let Some(name) = pending_remove {
            if let Some(index) = self.agents.iter().position(|a| a.name() == name) {
                let mut removed = self.agents.remove(index);
                if let Err(error) = removed.on_close() {
                    failures.push(SubAgentFailure::new(removed.name(), error));
                }
            }
        }

        if !failures.is_empty() {
            return Err(AgentError::Aggregate(failures));
        }

        let mut work_count = 0;
        for agent in &mut self.agents {
            work_count += agent.do_work()?;
        }
        Ok(work_count)
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        self.shared
            .status
            .store(CompositeStatus::Closed as u8, Ordering::Release);

        let mut failures = Vec::new();
        for mut agent in self.agents.drain(..) {
            if let Err(error) = agent.on_close() {
                failures.push(SubAgentFailure::new(agent.name(), error));
            }
        }

        {
            let mut slots = self.shared.pending();
            slots.add = None;
            slots.remove = None;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Aggregate(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Probe {
        starts: AtomicUsize,
        ticks: AtomicUsize,
        closes: AtomicUsize,
    }

    struct ProbeAgent {
        name: String,
        work: usize,
        fail_start: bool,
        probe: Arc<Probe>,
    }

    impl ProbeAgent {
        fn boxed(name: &str, work: usize) -> (Box<dyn Agent>, Arc<Probe>) {
            let probe = Arc::new(Probe::default());
            let agent = Box::new(Self {
                name: name.to_string(),
                work,
                fail_start: false,
                probe: probe.clone(),
            });
            (agent, probe)
        }
    }

    impl Agent for ProbeAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(&mut self) -> Result<(), AgentError> {
            self.probe.starts.fetch_add(1, Ordering::Relaxed);
            if self.fail_start {
                return Err(AgentError::failed("start refused"));
            }
            Ok(())
        }

        fn do_work(&mut self) -> Result<usize, AgentError> {
            self.probe.ticks.fetch_add(1, Ordering::Relaxed);
            Ok(self.work)
        }

        fn on_close(&mut self) -> Result<(), AgentError> {
            self.probe.closes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_membership_add_then_remove() {
        let (a, a_probe) = ProbeAgent::boxed("a", 1);
        let (b, b_probe) = ProbeAgent::boxed("b", 1);

        let mut composite = DynamicCompositeAgent::new("pool", vec![a]);
        let controller = composite.controller();

        assert_eq!(composite.status(), CompositeStatus::Init);
        composite.on_start().unwrap();
        assert_eq!(composite.status(), CompositeStatus::Active);
        assert_eq!(a_probe.starts.load(Ordering::Relaxed), 1);

        assert!(controller.try_add(b).is_ok());
        assert!(!controller.has_add_completed());

        // The add is applied before the ticks, so both members run.
        assert_eq!(composite.do_work().unwrap(), 2);
        assert!(controller.has_add_completed());
        assert_eq!(b_probe.starts.load(Ordering::Relaxed), 1);

        assert!(controller.try_remove("a"));
        assert!(!controller.has_remove_completed());

        // "a" is removed before its tick; only "b" runs.
        assert_eq!(composite.do_work().unwrap(), 1);
        assert!(controller.has_remove_completed());
        assert_eq!(a_probe.closes.load(Ordering::Relaxed), 1);
        assert_eq!(a_probe.ticks.load(Ordering::Relaxed), 1);
        assert_eq!(b_probe.ticks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_pending_slots_are_single_entry() {
        let mut composite = DynamicCompositeAgent::new("pool", Vec::new());
        let controller = composite.controller();
        composite.on_start().unwrap();

        let (first, _) = ProbeAgent::boxed("first", 0);
        let (second, _) = ProbeAgent::boxed("second", 0);

        assert!(controller.try_add(first).is_ok());
        // Slot occupied: the agent comes back to the caller.
        let declined = controller.try_add(second);
        assert_eq!(declined.as_ref().err().map(|a| a.name()), Some("second"));

        assert!(controller.try_remove("first"));
        assert!(!controller.try_remove("first"));
    }

    #[test]
    fn test_failed_add_closes_newcomer_and_reports_both() {
        let probe = Arc::new(Probe::default());
        let failing = Box::new(ProbeAgent {
            name: "sick".to_string(),
            work: 0,
            fail_start: true,
            probe: probe.clone(),
        });

        let mut composite = DynamicCompositeAgent::new("pool", Vec::new());
        let controller = composite.controller();
        composite.on_start().unwrap();

        controller.try_add(failing).map_err(|_| ()).unwrap();
        let Err(AgentError::Aggregate(failures)) = composite.do_work() else {
            panic!("expected aggregate failure");
        };

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent, "sick");
        assert_eq!(probe.closes.load(Ordering::Relaxed), 1);
        assert_eq!(composite.len(), 0);
        // The slot drained even though the add failed.
        assert!(controller.has_add_completed());
    }

    #[test]
    fn test_failed_add_does_not_swallow_pending_remove() {
        let (a, a_probe) = ProbeAgent::boxed("a", 1);
        let probe = Arc::new(Probe::default());
        let failing = Box::new(ProbeAgent {
            name: "sick".to_string(),
            work: 0,
            fail_start: true,
            probe: probe.clone(),
        });

        let mut composite = DynamicCompositeAgent::new("pool", vec![a]);
        let controller = composite.controller();
        composite.on_start().unwrap();

        assert!(controller.try_add(failing).is_ok());
        assert!(controller.try_remove("a"));

        let Err(AgentError::Aggregate(failures)) = composite.do_work() else {
            panic!("expected aggregate failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent, "sick");

        // The removal accepted alongside the failed add still applied:
        // "a" was closed and left the composite.
        assert_eq!(a_probe.closes.load(Ordering::Relaxed), 1);
        assert!(composite.is_empty());
        assert!(controller.has_add_completed());
        assert!(controller.has_remove_completed());

        // The next cycle is an ordinary empty one.
        assert_eq!(composite.do_work().unwrap(), 0);
        assert_eq!(a_probe.ticks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_remove_of_unknown_name_is_a_no_op() {
        let (a, a_probe) = ProbeAgent::boxed("a", 1);
        let mut composite = DynamicCompositeAgent::new("pool", vec![a]);
        let controller = composite.controller();
        composite.on_start().unwrap();

        assert!(controller.try_remove("ghost"));
        assert_eq!(composite.do_work().unwrap(), 1);
        assert!(controller.has_remove_completed());
        assert_eq!(a_probe.closes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_close_closes_members_and_clears_slots() {
        let (a, a_probe) = ProbeAgent::boxed("a", 0);
        let (pending, pending_probe) = ProbeAgent::boxed("pending", 0);

        let mut composite = DynamicCompositeAgent::new("pool", vec![a]);
        let controller = composite.controller();
        composite.on_start().unwrap();
        controller.try_add(pending).map_err(|_| ()).unwrap();

        composite.on_close().unwrap();
        assert_eq!(composite.status(), CompositeStatus::Closed);
        assert_eq!(composite.len(), 0);
        assert_eq!(a_probe.closes.load(Ordering::Relaxed), 1);
        // The pending newcomer never started, so it is dropped unclosed.
        assert_eq!(pending_probe.starts.load(Ordering::Relaxed), 0);
        assert_eq!(pending_probe.closes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_try_add_outside_active_panics() {
        let composite = DynamicCompositeAgent::new("pool", Vec::new());
        let controller = composite.controller();
        let (agent, _) = ProbeAgent::boxed("early", 0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = controller.try_add(agent);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_added_member_can_be_removed_same_cycle() {
        let (a, a_probe) = ProbeAgent::boxed("a", 1);
        let mut composite = DynamicCompositeAgent::new("pool", Vec::new());
        let controller = composite.controller();
        composite.on_start().unwrap();

        controller.try_add(a).map_err(|_| ()).unwrap();
        assert!(controller.try_remove("a"));

        // Add applies first (starting "a"), then the removal closes it
        // before any tick runs.
        assert_eq!(composite.do_work().unwrap(), 0);
        assert_eq!(a_probe.starts.load(Ordering::Relaxed), 1);
        assert_eq!(a_probe.closes.load(Ordering::Relaxed), 1);
        assert_eq!(a_probe.ticks.load(Ordering::Relaxed), 0);
        assert!(composite.is_empty());
    }
}
