//! Fixed composition of agents onto one duty cycle.

use super::{Agent, AgentError, SubAgentFailure};

/// An agent driving an immutable, ordered set of sub-agents as one unit.
///
/// Lifecycle edges visit every sub-agent in construction order even when
/// earlier ones fail; the failures come back as a single
/// [`AgentError::Aggregate`]. Work ticks sum the sub-agents' work counts
/// and stop at the first failure, which propagates to the owning runner's
/// error sink.
pub struct CompositeAgent {
    name: String,
    agents: Vec<Box<dyn Agent>>,
}

impl CompositeAgent {
    /// Combines `agents` into one. The composite's name is the bracketed,
    /// comma-joined list of the sub-agent names.
    ///
    /// # Panics
    ///
    /// Panics if `agents` is empty.
    #[must_use]
    pub fn new(agents: Vec<Box<dyn Agent>>) -> Self {
        assert!(!agents.is_empty(), "composite agent requires at least one sub-agent");
        let name = format!(
            "[{}]",
            agents.iter().map(|a| a.name()).collect::<Vec<_>>().join(",")
        );
        Self { name, agents }
    }

    /// Number of sub-agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always `false`: empty composites are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Agent for CompositeAgent {
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
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Aggregate(failures))
        }
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        let mut work_count = 0;
        for agent in &mut self.agents {
            work_count += agent.do_work()?;
        }
        Ok(work_count)
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        let mut failures = Vec::new();
        for agent in &mut self.agents {
            if let Err(error) = agent.on_close() {
                failures.push(SubAgentFailure::new(agent.name(), error));
            }
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

    struct StubAgent {
        name: String,
        work: usize,
        starts: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_start: bool,
        fail_close: bool,
    }

    impl StubAgent {
        fn boxed(name: &str, work: usize) -> (Box<dyn Agent>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let closes = Arc::new(AtomicUsize::new(0));
            let agent = Box::new(Self {
                name: name.to_string(),
                work,
                starts: starts.clone(),
                closes: closes.clone(),
                fail_start: false,
                fail_close: false,
            });
            (agent, starts, closes)
        }
    }

    impl Agent for StubAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_start(&mut self) -> Result<(), AgentError> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            if self.fail_start {
                return Err(AgentError::failed(format!("{} start failed", self.name)));
            }
            Ok(())
        }

        fn do_work(&mut self) -> Result<usize, AgentError> {
            Ok(self.work)
        }

        fn on_close(&mut self) -> Result<(), AgentError> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            if self.fail_close {
                return Err(AgentError::failed(format!("{} close failed", self.name)));
            }
            Ok(())
        }
    }

    #[test]
    fn test_name_is_bracketed_join() {
        let (a, _, _) = StubAgent::boxed("alpha", 0);
        let (b, _, _) = StubAgent::boxed("beta", 0);
        let composite = CompositeAgent::new(vec![a, b]);
        assert_eq!(composite.name(), "[alpha,beta]");
        assert_eq!(composite.len(), 2);
    }

    #[test]
    fn test_empty_composite_rejected() {
        let result = std::panic::catch_unwind(|| CompositeAgent::new(Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_do_work_sums_in_order() {
        let (a, _, _) = StubAgent::boxed("a", 2);
        let (b, _, _) = StubAgent::boxed("b", 3);
        let (c, _, _) = StubAgent::boxed("c", 0);
        let mut composite = CompositeAgent::new(vec![a, b, c]);
        assert_eq!(composite.do_work().unwrap(), 5);
    }

    #[test]
    fn test_do_work_failure_propagates() {
        struct Failing;
        impl Agent for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn do_work(&mut self) -> Result<usize, AgentError> {
                Err(AgentError::failed("tick broke"))
            }
        }

        let (a, _, _) = StubAgent::boxed("a", 1);
        let mut composite = CompositeAgent::new(vec![a, Box::new(Failing)]);
        assert!(matches!(
            composite.do_work(),
            Err(AgentError::Failed(msg)) if msg == "tick broke"
        ));
    }

    #[test]
    fn test_on_start_attempts_all_and_aggregates() {
        let (a, a_starts, _) = StubAgent::boxed("a", 0);
        let b_starts = Arc::new(AtomicUsize::new(0));
        let b_fail = Box::new(StubAgent {
            name: "b".to_string(),
            work: 0,
            starts: b_starts.clone(),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_start: true,
            fail_close: false,
        });
        let (c, c_starts, _) = StubAgent::boxed("c", 0);

        let mut composite = CompositeAgent::new(vec![a, b_fail, c]);
        let Err(AgentError::Aggregate(failures)) = composite.on_start() else {
            panic!("expected aggregate failure");
        };

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent, "b");
        // Every sub-agent was attempted despite the failure in the middle.
        assert_eq!(a_starts.load(Ordering::Relaxed), 1);
        assert_eq!(b_starts.load(Ordering::Relaxed), 1);
        assert_eq!(c_starts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_on_close_collects_every_failure() {
        let make_failing_closer = |name: &str, closes: &Arc<AtomicUsize>| {
            Box::new(StubAgent {
                name: name.to_string(),
                work: 0,
                starts: Arc::new(AtomicUsize::new(0)),
                closes: closes.clone(),
                fail_start: false,
                fail_close: true,
            })
        };

        let first_closes = Arc::new(AtomicUsize::new(0));
        let second_closes = Arc::new(AtomicUsize::new(0));
        let mut composite = CompositeAgent::new(vec![
            make_failing_closer("first", &first_closes),
            make_failing_closer("second", &second_closes),
        ]);

        let Err(AgentError::Aggregate(failures)) = composite.on_close() else {
            panic!("expected aggregate failure");
        };

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].agent, "first");
        assert_eq!(failures[1].agent, "second");
        assert_eq!(first_closes.load(Ordering::Relaxed), 1);
        assert_eq!(second_closes.load(Ordering::Relaxed), 1);
    }
}
