//! Simulation Engine - pull-based update stream over one workflow run
//!
//! Each `step().await` yields at most one record. Pulling the next record is
//! the resume request, so a caller that stops pulling leaves the run parked
//! at its last suspension marker.

use super::behavior::BehaviorTable;
use super::entropy::Entropy;
use super::events::{NodeStatus, Update, SYSTEM_NODE};
use super::graph::{Role, Workflow};
use super::latency::LatencySampler;
use super::scheduler::Scheduler;
use super::validator::NodeValidator;
use crate::config::SimulationConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Stopped,
}

/// One pull from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub update: Option<Update>,
    /// No further records will follow
    pub done: bool,
}

/// Where the next pull resumes
#[derive(Debug)]
enum Cursor {
    Start,
    Warmup,
    Dispatch,
    Work(String),
    Propagate,
    Summarize,
    Closed,
}

pub struct Engine {
    scheduler: Scheduler,
    step_mode: bool,
    startup_delay: Duration,
    time_scale: f64,
    cursor: Cursor,
    phase: RunPhase,
    outbox: VecDeque<Update>,
}

impl Engine {
    /// Engine with the default configuration
    pub fn new(workflow: impl Into<Arc<Workflow>>, step_mode: bool) -> Self {
        Self::with_config(workflow, step_mode, &SimulationConfig::default())
    }

    pub fn with_config(
        workflow: impl Into<Arc<Workflow>>,
        step_mode: bool,
        config: &SimulationConfig,
    ) -> Self {
        let time_scale = if config.time_scale.is_finite() && config.time_scale >= 0.0 {
            config.time_scale
        } else {
            log::warn!("Ignoring time_scale {}, using 1.0", config.time_scale);
            1.0
        };

        Self {
            scheduler: Scheduler::new(workflow.into(), config),
            step_mode,
            startup_delay: config.startup_delay(),
            time_scale,
            cursor: Cursor::Start,
            phase: RunPhase::Idle,
            outbox: VecDeque::new(),
        }
    }

    pub fn with_sampler(mut self, sampler: impl LatencySampler + 'static) -> Self {
        self.scheduler.set_sampler(Box::new(sampler));
        self
    }

    pub fn with_entropy(mut self, entropy: impl Entropy + 'static) -> Self {
        self.scheduler.set_entropy(Box::new(entropy));
        self
    }

    pub fn with_behaviors(mut self, behaviors: BehaviorTable) -> Self {
        self.scheduler.set_behaviors(behaviors);
        self
    }

    pub fn with_validator(mut self, validator: NodeValidator) -> Self {
        self.scheduler.set_validator(validator);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_step_mode(&self) -> bool {
        self.step_mode
    }

    pub fn workflow(&self) -> &Workflow {
        self.scheduler.workflow()
    }

    /// Advance the run until one record is available
    pub async fn step(&mut self) -> Step {
        loop {
            if let Some(update) = self.outbox.pop_front() {
                log::debug!("{}", update);
                let done = self.outbox.is_empty() && matches!(self.cursor, Cursor::Closed);
                return Step {
                    update: Some(update),
                    done,
                };
            }

            // A dropped in-flight step leaves `Closed` behind
            match std::mem::replace(&mut self.cursor, Cursor::Closed) {
                Cursor::Start => self.open(),
                Cursor::Warmup => {
                    pause(self.startup_delay, self.time_scale).await;
                    self.cursor = Cursor::Dispatch;
                }
                Cursor::Dispatch => match self.scheduler.next_ready() {
                    Some(name) => {
                        self.outbox.push_back(Update::info(&name, "Starting node..."));
                        self.outbox
                            .push_back(Update::status(&name, NodeStatus::Running));
                        self.cursor = Cursor::Work(name);
                    }
                    None => self.cursor = Cursor::Propagate,
                },
                Cursor::Work(name) => {
                    let latency = self.scheduler.sample_latency(&name);
                    pause(latency, self.time_scale).await;
                    self.work(&name, latency);
                    self.cursor = Cursor::Dispatch;
                }
                Cursor::Propagate => {
                    self.outbox.extend(self.scheduler.propagate_failures());
                    self.cursor = Cursor::Summarize;
                }
                Cursor::Summarize => {
                    self.outbox.push_back(self.scheduler.summarize());
                    self.close(RunPhase::Completed);
                }
                Cursor::Closed => {
                    if self.phase == RunPhase::Running {
                        log::info!("Simulation abandoned mid-step");
                        self.close(RunPhase::Stopped);
                    }
                    return Step {
                        update: None,
                        done: true,
                    };
                }
            }
        }
    }

    /// Option form of [`Engine::step`]
    pub async fn next_update(&mut self) -> Option<Update> {
        self.step().await.update
    }

    /// Drain the run into a list
    pub async fn run_to_completion(mut self) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    /// End the run now, discarding run state and unsent records
    pub fn stop(&mut self) {
        self.outbox.clear();
        if matches!(self.phase, RunPhase::Idle | RunPhase::Running) {
            log::info!("Simulation stopped");
            self.close(RunPhase::Stopped);
        }
        self.cursor = Cursor::Closed;
    }

    /// Return to idle; the next pull starts a fresh run
    pub fn reset(&mut self) {
        self.outbox.clear();
        self.scheduler.finish();
        self.cursor = Cursor::Start;
        self.phase = RunPhase::Idle;
    }

    fn open(&mut self) {
        self.phase = RunPhase::Running;
        let name = self.scheduler.workflow().name.clone();
        log::info!("Starting simulation of '{}'", name);
        self.outbox
            .push_back(Update::info(SYSTEM_NODE, "Starting system simulation..."));

        match self.scheduler.begin() {
            Ok(()) => self.cursor = Cursor::Warmup,
            Err(err) => {
                log::warn!("Simulation of '{}' aborted: {}", name, err);
                self.outbox.push_back(Update::error(
                    SYSTEM_NODE,
                    format!("Simulation aborted: {}", err),
                ));
                self.close(RunPhase::Completed);
            }
        }
    }

    fn work(&mut self, name: &str, latency: Duration) {
        let step = self.scheduler.execute(name, latency);
        self.outbox.extend(step.records);

        let gated = step.role.as_ref().is_some_and(|role| *role != Role::UserApproval);
        if self.step_mode && gated && self.scheduler.has_ready() {
            self.outbox.push_back(Update::suspend(name, None));
        }
    }

    fn close(&mut self, phase: RunPhase) {
        self.scheduler.finish();
        self.cursor = Cursor::Closed;
        self.phase = phase;
    }
}

/// The only delay point of a run
async fn pause(delay: Duration, time_scale: f64) {
    if delay.is_zero() || time_scale == 0.0 {
        return;
    }
    let scaled =
        Duration::try_from_secs_f64(delay.as_secs_f64() * time_scale).unwrap_or(Duration::MAX);
    tokio::time::sleep(scaled).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entropy::ScriptedEntropy;
    use crate::core::graph::{Agent, Category, Flow, FlowLink};
    use crate::core::latency::FixedLatency;

    fn pipeline() -> Workflow {
        Workflow::new(
            "pipeline",
            vec![
                Agent::new("Start", "start", Category::Core),
                Agent::new("Plan", "planner", Category::Agent)
                    .with_tools(["cloud_functions"])
                    .with_tasks(["plan"]),
                Agent::new("End", "end", Category::Core),
            ],
            vec![
                FlowLink::new("Start", ["Plan"]),
                FlowLink::new("Plan", ["End"]),
            ],
        )
    }

    fn engine(workflow: Workflow, step_mode: bool) -> Engine {
        Engine::with_config(workflow, step_mode, &SimulationConfig::default().instant())
            .with_entropy(ScriptedEntropy::always(true))
    }

    #[tokio::test]
    async fn test_run_ends_with_summary() {
        let mut engine = engine(pipeline(), false);
        assert_eq!(engine.phase(), RunPhase::Idle);

        let mut last = None;
        loop {
            let step = engine.step().await;
            if let Some(update) = step.update {
                last = Some(update);
            }
            if step.done {
                break;
            }
        }

        assert_eq!(engine.phase(), RunPhase::Completed);
        let summary = last.unwrap().summary.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);

        let after = engine.step().await;
        assert!(after.update.is_none());
        assert!(after.done);
    }

    #[tokio::test]
    async fn test_step_mode_marks_suspensions() {
        let updates = engine(pipeline(), true).run_to_completion().await;
        let pauses: Vec<&str> = updates
            .iter()
            .filter_map(|u| u.suspend.as_ref())
            .map(|s| s.node_name.as_str())
            .collect();
        // Nothing is waiting after End, so no marker there
        assert_eq!(pauses, vec!["Start", "Plan"]);
    }

    #[tokio::test]
    async fn test_structural_error_closes_without_summary() {
        let mut workflow = pipeline();
        workflow.flow = Flow::Malformed(serde_yaml::Value::String("Start -> End".into()));

        let updates = engine(workflow, false).run_to_completion().await;
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.summary.is_none() && u.status.is_none()));
        let fatal = updates[1].log.as_ref().unwrap();
        assert!(fatal.message.contains("invalid flow format"));
    }

    #[tokio::test]
    async fn test_stop_discards_pending_records() {
        let mut engine = engine(pipeline(), false);
        engine.next_update().await.unwrap();
        engine.stop();

        assert_eq!(engine.phase(), RunPhase::Stopped);
        assert!(engine.next_update().await.is_none());

        engine.reset();
        assert_eq!(engine.phase(), RunPhase::Idle);
        let rerun = engine.run_to_completion().await;
        assert!(rerun.last().unwrap().summary.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_slept() {
        let config = SimulationConfig {
            startup_delay_ms: 0,
            ..SimulationConfig::default()
        };
        let workflow = Workflow::new(
            "one",
            vec![Agent::new("Plan", "planner", Category::Agent)
                .with_tools(["cloud_functions"])
                .with_tasks(["plan"])],
            vec![],
        );
        let engine = Engine::with_config(workflow, false, &config)
            .with_sampler(FixedLatency(Duration::from_millis(500)));

        let started = tokio::time::Instant::now();
        let updates = engine.run_to_completion().await;
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        let passed = updates
            .iter()
            .filter_map(|u| u.log.as_ref())
            .find(|log| log.message == "Agent passed validation.")
            .unwrap();
        assert_eq!(passed.duration_ms, Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_step_abandons_run() {
        let config = SimulationConfig {
            startup_delay_ms: 0,
            ..SimulationConfig::default()
        };
        let mut engine = Engine::with_config(pipeline(), false, &config)
            .with_sampler(FixedLatency(Duration::from_secs(10)));

        // Start log, Start's "Starting node..." and running status
        for _ in 0..3 {
            engine.next_update().await.unwrap();
        }
        let pending = tokio::time::timeout(Duration::from_secs(1), engine.step()).await;
        assert!(pending.is_err());

        assert!(engine.next_update().await.is_none());
        assert_eq!(engine.phase(), RunPhase::Stopped);
    }
}
