//! Execution Scheduler - ready-queue dispatch, routing and failure tracking

use super::behavior::{BehaviorTable, StepContext};
use super::entropy::{Entropy, SeededEntropy};
use super::error::SimError;
use super::events::{LogKind, LogLine, NodeStatus, RunSummary, Update, SYSTEM_NODE};
use super::graph::{Role, Workflow};
use super::latency::{LatencySampler, ToolLatencySampler};
use super::validator::{NodeValidator, Verdict};
use crate::config::SimulationConfig;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub const SKIP_REASON: &str = "Skipped because an upstream node failed.";

/// Mutable state of a single run
#[derive(Debug, Default)]
pub struct RunState {
    queue: VecDeque<String>,
    failed: HashSet<String>,
    succeeded: HashSet<String>,
    /// Succeeded nodes that ordinary routing must not re-enter
    settled: HashSet<String>,
    scratch: HashMap<String, String>,
    loop_counters: HashMap<String, u32>,
}

impl RunState {
    fn seeded<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut state = Self::default();
        for name in entries {
            state.enqueue(name);
        }
        state
    }

    /// Queue `name` unless it is already waiting or already settled
    pub fn enqueue(&mut self, name: &str) -> bool {
        if self.settled.contains(name) || self.is_queued(name) {
            return false;
        }
        self.queue.push_back(name.to_string());
        true
    }

    fn reopen(&mut self, name: &str) {
        self.settled.remove(name);
        if !self.is_queued(name) {
            self.queue.push_back(name.to_string());
        }
    }

    pub fn is_queued(&self, name: &str) -> bool {
        self.queue.iter().any(|queued| queued == name)
    }

    pub fn queue(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains(name)
    }

    pub fn has_succeeded(&self, name: &str) -> bool {
        self.succeeded.contains(name)
    }

    pub fn scratch(&self) -> &HashMap<String, String> {
        &self.scratch
    }

    pub fn loop_count(&self, name: &str) -> u32 {
        self.loop_counters.get(name).copied().unwrap_or(0)
    }
}

/// Records produced by running one node
#[derive(Debug, Default)]
pub struct NodeStep {
    pub records: Vec<Update>,
    pub role: Option<Role>,
    pub passed: bool,
}

/// Workflow scheduler: owns the run state between `begin` and `finish`
pub struct Scheduler {
    workflow: Arc<Workflow>,
    validator: NodeValidator,
    behaviors: BehaviorTable,
    sampler: Box<dyn LatencySampler>,
    entropy: Box<dyn Entropy>,
    max_loop_iterations: u32,
    state: Option<RunState>,
}

impl Scheduler {
    /// Create a scheduler with the built-in validator, behaviors and samplers
    pub fn new(workflow: Arc<Workflow>, config: &SimulationConfig) -> Self {
        let sampler = ToolLatencySampler::new(
            config.latency.clone(),
            config.logic_latency(),
            config.seed,
        );
        // Keep the two streams independent under one seed
        let entropy = SeededEntropy::new(
            config.seed.map(|seed| seed.wrapping_add(0x9e37_79b9)),
            config.transfer_kb,
        );

        Self {
            workflow,
            validator: NodeValidator::new(),
            behaviors: BehaviorTable::standard(),
            sampler: Box::new(sampler),
            entropy: Box::new(entropy),
            max_loop_iterations: config.max_loop_iterations,
            state: None,
        }
    }

    pub fn set_sampler(&mut self, sampler: Box<dyn LatencySampler>) {
        self.sampler = sampler;
    }

    pub fn set_entropy(&mut self, entropy: Box<dyn Entropy>) {
        self.entropy = entropy;
    }

    pub fn set_behaviors(&mut self, behaviors: BehaviorTable) {
        self.behaviors = behaviors;
    }

    pub fn set_validator(&mut self, validator: NodeValidator) {
        self.validator = validator;
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    /// Create fresh run state seeded with every entry point
    pub fn begin(&mut self) -> Result<(), SimError> {
        let entries = self.workflow.entry_points()?;
        log::debug!("Entry points: {:?}", entries);
        self.state = Some(RunState::seeded(entries));
        Ok(())
    }

    /// Pop the next runnable node, dropping failed or undeclared names
    pub fn next_ready(&mut self) -> Option<String> {
        let state = self.state.as_mut()?;

        while let Some(name) = state.queue.pop_front() {
            if state.failed.contains(&name) {
                continue;
            }
            if self.workflow.agent(&name).is_none() {
                log::debug!("Dropping undeclared node '{}'", name);
                continue;
            }
            return Some(name);
        }
        None
    }

    pub fn has_ready(&self) -> bool {
        self.state
            .as_ref()
            .map(|state| !state.queue.is_empty())
            .unwrap_or(false)
    }

    pub fn sample_latency(&mut self, name: &str) -> Duration {
        match self.workflow.agent(name) {
            Some(agent) => self.sampler.sample(agent),
            None => Duration::ZERO,
        }
    }

    /// Run one node's behavior and validation, then route its successors
    pub fn execute(&mut self, name: &str, latency: Duration) -> NodeStep {
        let workflow = Arc::clone(&self.workflow);
        let Some(agent) = workflow.agent(name) else {
            return NodeStep::default();
        };
        let Some(state) = self.state.as_mut() else {
            return NodeStep::default();
        };

        let mut ctx = StepContext {
            agent,
            workflow: &workflow,
            validator: &self.validator,
            scratch: &mut state.scratch,
            loop_counters: &mut state.loop_counters,
            entropy: self.entropy.as_mut(),
            max_loop_iterations: self.max_loop_iterations,
            latency,
        };
        let outcome = self.behaviors.resolve(&agent.role).run(&mut ctx);
        let mut records = outcome.records;

        // With a back-edge from the body, the body re-enqueues the loop node
        let mut held_open = false;
        if !outcome.reopen.is_empty() {
            let body = workflow.loop_body(name);
            held_open = workflow
                .predecessors(name)
                .into_iter()
                .any(|pred| body.contains(pred));
            for node in &body {
                state.settled.remove(node);
            }
            for entry in &outcome.reopen {
                if held_open && entry == name {
                    continue;
                }
                state.reopen(entry);
            }
        }

        let verdict = outcome
            .verdict
            .unwrap_or_else(|| self.validator.validate(agent, &workflow));

        let passed = match verdict {
            Verdict::Fail(diagnosis) => {
                log::warn!("Node '{}' failed: {}", name, diagnosis.error);
                state.failed.insert(name.to_string());
                records.push(Update::error(
                    name,
                    format!("Validation error: {}", diagnosis.error),
                ));
                records.push(Update::info(
                    name,
                    format!("Suggested fix: {}", diagnosis.solution),
                ));
                records.push(Update::failed(name, &diagnosis));
                false
            }
            Verdict::Pass => {
                state.succeeded.insert(name.to_string());
                if !held_open {
                    state.settled.insert(name.to_string());
                }
                records.push(Update::status(name, NodeStatus::Success));

                for next in outcome.successors {
                    if state.failed.contains(&next) {
                        continue;
                    }
                    records.push(Update::data(name, next.as_str(), self.entropy.transfer_kb()));
                    state.enqueue(&next);
                }
                true
            }
        };

        NodeStep {
            records,
            role: Some(agent.role.clone()),
            passed,
        }
    }

    /// Mark every node downstream of a failure as skipped
    pub fn propagate_failures(&mut self) -> Vec<Update> {
        let Some(state) = self.state.as_mut() else {
            return Vec::new();
        };

        let mut records = Vec::new();
        loop {
            let mut changed = false;
            for agent in &self.workflow.agents {
                let name = agent.name.as_str();
                if state.failed.contains(name) || state.succeeded.contains(name) {
                    continue;
                }
                let blocked = self
                    .workflow
                    .predecessors(name)
                    .into_iter()
                    .any(|pred| state.failed.contains(pred));
                if blocked {
                    state.failed.insert(name.to_string());
                    records.push(Update::skipped(name, SKIP_REASON));
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        if !records.is_empty() {
            log::info!("Skipped {} node(s) downstream of failures", records.len());
        }
        records
    }

    pub fn summary(&self) -> RunSummary {
        let total = self.workflow.agents.len();
        let Some(state) = self.state.as_ref() else {
            return RunSummary {
                total,
                succeeded: 0,
                failed: 0,
                unreached: total,
            };
        };

        let names = || self.workflow.agents.iter().map(|agent| agent.name.as_str());
        let failed = names().filter(|name| state.failed.contains(*name)).count();
        let succeeded = names()
            .filter(|name| state.succeeded.contains(*name) && !state.failed.contains(*name))
            .count();

        RunSummary {
            total,
            succeeded,
            failed,
            unreached: total.saturating_sub(failed + succeeded),
        }
    }

    /// Close-out record for the run
    pub fn summarize(&self) -> Update {
        let summary = self.summary();
        let RunSummary {
            total,
            succeeded,
            failed,
            unreached,
        } = summary;

        let (kind, mut message) = if failed == 0 && unreached == 0 {
            (
                LogKind::Success,
                format!(
                    "Simulation finished successfully. All nodes ({}/{}) were processed.",
                    total, total
                ),
            )
        } else if failed == 0 {
            (
                LogKind::Success,
                format!(
                    "Simulation finished successfully. Succeeded: {}/{}.",
                    succeeded, total
                ),
            )
        } else {
            (
                LogKind::Error,
                format!(
                    "Simulation finished. Succeeded: {}/{}. Failed or skipped: {}/{}.",
                    succeeded, total, failed, total
                ),
            )
        };
        if unreached > 0 {
            message.push_str(&format!(" Not reached: {}/{}.", unreached, total));
        }

        log::info!("{}", message);
        Update::summary(
            summary,
            LogLine {
                kind,
                message,
                node_name: SYSTEM_NODE.to_string(),
                duration_ms: None,
            },
        )
    }

    /// Drop the run state
    pub fn finish(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entropy::ScriptedEntropy;
    use crate::core::graph::{Agent, Category, FlowLink};

    fn worker(name: &str) -> Agent {
        Agent::new(name, "planner", Category::Agent)
            .with_tools(["cloud_functions"])
            .with_tasks(["work"])
    }

    fn scheduler(workflow: Workflow) -> Scheduler {
        let mut scheduler = Scheduler::new(Arc::new(workflow), &SimulationConfig::default());
        scheduler.set_entropy(Box::new(ScriptedEntropy::always(true)));
        scheduler.begin().unwrap();
        scheduler
    }

    fn drain(scheduler: &mut Scheduler) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(name) = scheduler.next_ready() {
            scheduler.execute(&name, Duration::ZERO);
            order.push(name);
        }
        order
    }

    #[test]
    fn test_fifo_order_from_entry_points() {
        let workflow = Workflow::new(
            "fan",
            vec![worker("A"), worker("B"), worker("C"), worker("D")],
            vec![FlowLink::new("A", ["B", "C"]), FlowLink::new("B", ["D"])],
        );
        let mut scheduler = scheduler(workflow);
        assert_eq!(drain(&mut scheduler), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_join_runs_once() {
        // A -> B -> C -> D and A -> D
        let workflow = Workflow::new(
            "join",
            vec![worker("A"), worker("B"), worker("C"), worker("D")],
            vec![
                FlowLink::new("A", ["B", "D"]),
                FlowLink::new("B", ["C"]),
                FlowLink::new("C", ["D"]),
            ],
        );
        let mut scheduler = scheduler(workflow);
        assert_eq!(drain(&mut scheduler), vec!["A", "B", "D", "C"]);
        assert_eq!(scheduler.summary().succeeded, 4);
    }

    #[test]
    fn test_failure_blocks_successors() {
        let workflow = Workflow::new(
            "fail",
            vec![Agent::new("A", "retriever", Category::Agent), worker("B")],
            vec![FlowLink::new("A", ["B"])],
        );
        let mut scheduler = scheduler(workflow);
        let name = scheduler.next_ready().unwrap();
        let step = scheduler.execute(&name, Duration::ZERO);

        assert!(!step.passed);
        assert!(step.records.iter().all(|r| r.data.is_none()));
        assert!(!scheduler.has_ready());
        assert!(scheduler.state().unwrap().is_failed("A"));

        let skipped = scheduler.propagate_failures();
        assert_eq!(skipped.len(), 1);
        assert_eq!(
            skipped[0].status.as_ref().unwrap().status,
            NodeStatus::Skipped
        );
    }

    #[test]
    fn test_skip_propagation_ignores_declaration_order() {
        // C is declared before its skipped predecessor B
        let workflow = Workflow::new(
            "order",
            vec![
                worker("C"),
                Agent::new("A", "analyst", Category::Agent),
                worker("B"),
            ],
            vec![FlowLink::new("A", ["B"]), FlowLink::new("B", ["C"])],
        );
        let mut scheduler = scheduler(workflow);
        drain(&mut scheduler);

        let skipped: Vec<String> = scheduler
            .propagate_failures()
            .into_iter()
            .filter_map(|u| u.status.map(|s| s.node_name))
            .collect();
        assert_eq!(skipped, vec!["B", "C"]);
        assert_eq!(scheduler.summary().failed, 3);
    }

    #[test]
    fn test_loop_body_reruns() {
        let workflow = Workflow::new(
            "loop",
            vec![
                Agent::new("Start", "start", Category::Core),
                Agent::new("W", "while", Category::Logic),
                worker("B1"),
                worker("B2"),
                Agent::new("X", "end", Category::Core),
            ],
            vec![
                FlowLink::new("Start", ["W"]),
                FlowLink::new("W", ["B1"]).on_port(crate::core::graph::Port::Loop),
                FlowLink::new("B1", ["B2"]),
                FlowLink::new("B2", ["W"]),
                FlowLink::new("W", ["X"]).on_port(crate::core::graph::Port::Exit),
            ],
        );
        let mut scheduler = scheduler(workflow);
        let order = drain(&mut scheduler);

        assert_eq!(order.iter().filter(|n| *n == "B1").count(), 3);
        assert_eq!(order.iter().filter(|n| *n == "B2").count(), 3);
        assert_eq!(order.iter().filter(|n| *n == "X").count(), 1);
        assert_eq!(scheduler.state().unwrap().loop_count("W"), 4);

        // The loop node waits for the whole body before its next iteration
        assert_eq!(
            order,
            vec![
                "Start", "W", "B1", "B2", "W", "B1", "B2", "W", "B1", "B2", "W", "X"
            ]
        );
    }

    #[test]
    fn test_dangling_target_is_dropped() {
        let workflow = Workflow::new(
            "dangling",
            vec![worker("A")],
            vec![FlowLink::new("A", ["Ghost"])],
        );
        let mut scheduler = scheduler(workflow);
        assert_eq!(drain(&mut scheduler), vec!["A"]);
        assert_eq!(scheduler.summary().succeeded, 1);
    }

    #[test]
    fn test_begin_rejects_malformed_flow() {
        let mut workflow = Workflow::new("bad", vec![worker("A")], vec![]);
        workflow.flow = crate::core::graph::Flow::Malformed(serde_yaml::Value::String(
            "A -> B".to_string(),
        ));
        let mut scheduler = Scheduler::new(Arc::new(workflow), &SimulationConfig::default());
        assert!(matches!(scheduler.begin(), Err(SimError::InvalidFlow)));
        assert!(scheduler.next_ready().is_none());
    }
}
