//! Role behaviors - what each node role does when the scheduler runs it
//!
//! Behaviors live in a table keyed by role, so adding a role is one
//! `register` call rather than another branch in the scheduler.

use super::entropy::Entropy;
use super::events::Update;
use super::graph::{Agent, Port, Role, Workflow};
use super::validator::{NodeValidator, Verdict};
use std::collections::HashMap;
use std::time::Duration;

/// Scratch key written by `set_state` and checked by `guardrails`
pub const STATE_KEY: &str = "status";
/// Value `guardrails` expects under [`STATE_KEY`]
pub const STATE_SENTINEL: &str = "sukses";

/// Everything a behavior may read or touch while one node runs
pub struct StepContext<'a> {
    pub agent: &'a Agent,
    pub workflow: &'a Workflow,
    pub validator: &'a NodeValidator,
    pub scratch: &'a mut HashMap<String, String>,
    pub loop_counters: &'a mut HashMap<String, u32>,
    pub entropy: &'a mut dyn Entropy,
    pub max_loop_iterations: u32,
    /// Simulated duration of this step
    pub latency: Duration,
}

impl StepContext<'_> {
    pub fn name(&self) -> &str {
        &self.agent.name
    }

    pub fn default_successors(&self) -> Vec<String> {
        self.workflow.default_successors(&self.agent.name)
    }

    pub fn port_successors(&self, port: &Port) -> Vec<String> {
        self.workflow.port_successors(&self.agent.name, port)
    }
}

/// Result of a role behavior
#[derive(Debug, Default)]
pub struct Outcome {
    /// Records to emit before the node's status change
    pub records: Vec<Update>,
    /// Successors to route to if the node passes
    pub successors: Vec<String>,
    /// Nodes put straight back on the queue, even if they already ran
    pub reopen: Vec<String>,
    /// Verdict decided by the behavior; `None` defers to the validator
    pub verdict: Option<Verdict>,
}

impl Outcome {
    pub fn route(successors: Vec<String>) -> Self {
        Self {
            successors,
            ..Self::default()
        }
    }

    pub fn record(mut self, update: Update) -> Self {
        self.records.push(update);
        self
    }

    pub fn verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

pub trait RoleBehavior: Send + Sync {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome;
}

/// Role -> behavior table with a fallback for working roles
pub struct BehaviorTable {
    entries: HashMap<Role, Box<dyn RoleBehavior>>,
    fallback: Box<dyn RoleBehavior>,
}

impl BehaviorTable {
    /// Table with every built-in role
    pub fn standard() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
            fallback: Box::new(Standard),
        };
        table
            .register(Role::Note, Note)
            .register(Role::End, End)
            .register(Role::IfElse, Branch)
            .register(Role::While, BoundedLoop)
            .register(Role::UserApproval, ApprovalGate)
            .register(Role::SetState, SetState)
            .register(Role::Guardrails, Guardrails);
        table
    }

    pub fn register(&mut self, role: Role, behavior: impl RoleBehavior + 'static) -> &mut Self {
        self.entries.insert(role, Box::new(behavior));
        self
    }

    pub fn resolve(&self, role: &Role) -> &dyn RoleBehavior {
        self.entries
            .get(role)
            .map(|behavior| &**behavior)
            .unwrap_or(&*self.fallback)
    }
}

impl Default for BehaviorTable {
    fn default() -> Self {
        Self::standard()
    }
}

// === Built-in Behaviors ===

struct Note;
impl RoleBehavior for Note {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        Outcome::route(ctx.default_successors()).record(Update::info(ctx.name(), "Note skipped."))
    }
}

struct End;
impl RoleBehavior for End {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        Outcome::default().record(Update::success(ctx.name(), "Flow path finished."))
    }
}

/// `if_else`: a coin flip picks the `true` or `false` port
struct Branch;
impl RoleBehavior for Branch {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        let port = Port::from(ctx.entropy.branch(ctx.agent));
        let condition = ctx.agent.condition.as_deref().unwrap_or("default");
        let message = format!("Condition '{}' evaluated to {}.", condition, port);

        Outcome::route(ctx.port_successors(&port)).record(Update::info(ctx.name(), message))
    }
}

/// `while`: re-runs the loop port until the iteration cap, then takes `exit`
struct BoundedLoop;
impl RoleBehavior for BoundedLoop {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        let max = ctx.max_loop_iterations;
        let counter = ctx.loop_counters.entry(ctx.agent.name.clone()).or_insert(0);
        *counter += 1;
        let iteration = *counter;

        if iteration <= max {
            let mut reopen = ctx.port_successors(&Port::Loop);
            reopen.push(ctx.agent.name.clone());
            Outcome {
                reopen,
                ..Outcome::default()
            }
            .record(Update::info(
                ctx.name(),
                format!("Loop iteration {}/{}.", iteration, max),
            ))
        } else {
            Outcome::route(ctx.port_successors(&Port::Exit)).record(Update::info(
                ctx.name(),
                "Loop finished (iteration limit reached).",
            ))
        }
    }
}

/// `user_approval`: always suspends the run until the caller pulls again
struct ApprovalGate;
impl RoleBehavior for ApprovalGate {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        Outcome::route(ctx.default_successors())
            .record(Update::warning(ctx.name(), "Waiting for user approval..."))
            .record(Update::suspend(
                ctx.name(),
                Some("Waiting for approval...".to_string()),
            ))
    }
}

struct SetState;
impl RoleBehavior for SetState {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        ctx.scratch
            .insert(STATE_KEY.to_string(), STATE_SENTINEL.to_string());
        Outcome::route(ctx.default_successors()).record(Update::info(
            ctx.name(),
            format!("State set: {} = '{}'.", STATE_KEY, STATE_SENTINEL),
        ))
    }
}

/// `guardrails`: passes only after `set_state` wrote the sentinel in this run
struct Guardrails;
impl RoleBehavior for Guardrails {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        let outcome = Outcome::route(ctx.default_successors());

        if ctx.scratch.get(STATE_KEY).map(String::as_str) == Some(STATE_SENTINEL) {
            outcome
                .record(Update::success(ctx.name(), "Guardrails check passed."))
                .verdict(Verdict::Pass)
        } else {
            outcome.verdict(Verdict::fail(
                "Guardrails condition not met.",
                "Make sure a preceding \"set_state\" node sets the required state.",
            ))
        }
    }
}

/// Working nodes (and `start`): validate, then follow default links
struct Standard;
impl RoleBehavior for Standard {
    fn run(&self, ctx: &mut StepContext<'_>) -> Outcome {
        let verdict = ctx.validator.validate(ctx.agent, ctx.workflow);
        let mut outcome = Outcome::route(ctx.default_successors());

        if verdict.is_pass() {
            outcome = outcome.record(
                Update::success(ctx.name(), "Agent passed validation.")
                    .with_duration_ms(ctx.latency.as_millis() as u64),
            );
        }
        outcome.verdict(verdict)
    }
}
