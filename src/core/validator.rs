//! Node Validator - rule-based capability checks for workflow nodes
//!
//! Rules run in order and the first one with an opinion wins:
//! - Structural roles (start, branches, loops, approvals...) always pass
//! - Working nodes need at least one tool and one task
//! - Retriever, analyst and summarizer roles need a matching tool

use super::graph::{Agent, Workflow};
use serde::{Deserialize, Serialize};

pub const RETRIEVAL_TOOLS: &[&str] = &[
    "vertex_ai_search",
    "google_custom_search_api",
    "bigquery_connector",
    "google_drive_api",
    "file_search",
];

pub const ANALYSIS_TOOLS: &[&str] = &[
    "bigquery_connector",
    "vertex_ai_embeddings",
    "langchain_vertex",
    "vertex_ai_natural_language_api",
];

pub const OUTPUT_TOOLS: &[&str] = &[
    "google_docs_api",
    "google_slides_api",
    "cloud_storage_uploader",
    "google_sheets_api",
];

/// Why a node failed and how to fix it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub error: String,
    pub solution: String,
}

/// Validation outcome for a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(Diagnosis),
}

impl Verdict {
    pub fn fail(error: impl Into<String>, solution: impl Into<String>) -> Self {
        Self::Fail(Diagnosis {
            error: error.into(),
            solution: solution.into(),
        })
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn diagnosis(&self) -> Option<&Diagnosis> {
        match self {
            Self::Pass => None,
            Self::Fail(diagnosis) => Some(diagnosis),
        }
    }
}

/// A single validation rule. `None` means "no opinion, ask the next rule".
pub trait ValidationRule: Send + Sync {
    fn check(&self, agent: &Agent, workflow: &Workflow) -> Option<Verdict>;
}

/// Ordered rule list
pub struct NodeValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl NodeValidator {
    /// Create with all built-in rules
    pub fn new() -> Self {
        let rules: Vec<Box<dyn ValidationRule>> = vec![
            Box::new(StructuralRoleRule),
            Box::new(MissingToolsRule),
            Box::new(MissingTasksRule),
            Box::new(CapabilityRule {
                role_fragment: "retriever",
                vocabulary: RETRIEVAL_TOOLS,
                lacking: "data retrieval tools",
                remedy: "Add a tool such as 'vertex_ai_search' or 'bigquery_connector' so the agent can gather data.",
            }),
            Box::new(CapabilityRule {
                role_fragment: "analy",
                vocabulary: ANALYSIS_TOOLS,
                lacking: "analysis tools",
                remedy: "Add a tool such as 'vertex_ai_embeddings' or 'langchain_vertex' to analyze the data.",
            }),
            Box::new(CapabilityRule {
                role_fragment: "summarizer",
                vocabulary: OUTPUT_TOOLS,
                lacking: "output tools",
                remedy: "Add a tool such as 'google_docs_api' or 'google_slides_api' so the agent can produce reports.",
            }),
        ];
        Self { rules }
    }

    /// Append a rule after the built-in ones
    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn validate(&self, agent: &Agent, workflow: &Workflow) -> Verdict {
        self.rules
            .iter()
            .find_map(|rule| rule.check(agent, workflow))
            .unwrap_or(Verdict::Pass)
    }
}

impl Default for NodeValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a node with the built-in rules
pub fn validate(agent: &Agent, workflow: &Workflow) -> Verdict {
    NodeValidator::new().validate(agent, workflow)
}

// === Built-in Rules ===

struct StructuralRoleRule;
impl ValidationRule for StructuralRoleRule {
    fn check(&self, agent: &Agent, _workflow: &Workflow) -> Option<Verdict> {
        agent.role.is_structural().then_some(Verdict::Pass)
    }
}

struct MissingToolsRule;
impl ValidationRule for MissingToolsRule {
    fn check(&self, agent: &Agent, _workflow: &Workflow) -> Option<Verdict> {
        if !agent.tools.is_empty() {
            return None;
        }
        Some(Verdict::fail(
            format!("Agent \"{}\" is missing tools: none are defined.", agent.name),
            "Add at least one tool under 'tools' in the agent definition, e.g. 'vertex_ai_search'.",
        ))
    }
}

struct MissingTasksRule;
impl ValidationRule for MissingTasksRule {
    fn check(&self, agent: &Agent, _workflow: &Workflow) -> Option<Verdict> {
        if !agent.tasks.is_empty() {
            return None;
        }
        Some(Verdict::fail(
            format!("Agent \"{}\" is missing tasks: none are defined.", agent.name),
            "Define at least one task under 'tasks' so the agent knows what to do.",
        ))
    }
}

struct CapabilityRule {
    role_fragment: &'static str,
    vocabulary: &'static [&'static str],
    lacking: &'static str,
    remedy: &'static str,
}

impl ValidationRule for CapabilityRule {
    fn check(&self, agent: &Agent, _workflow: &Workflow) -> Option<Verdict> {
        if !agent.role.as_str().contains(self.role_fragment) {
            return None;
        }
        if agent.tool_names().any(|tool| self.vocabulary.contains(&tool)) {
            return None;
        }
        Some(Verdict::fail(
            format!(
                "Agent \"{}\" with role '{}' has no {}.",
                agent.name, agent.role, self.lacking
            ),
            self.remedy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Category;

    fn empty_workflow() -> Workflow {
        Workflow::new("test", vec![], vec![])
    }

    #[test]
    fn test_structural_roles_always_pass() {
        let workflow = empty_workflow();
        for role in [
            "start",
            "if_else",
            "while",
            "user_approval",
            "end",
            "note",
            "set_state",
            "guardrails",
        ] {
            let agent = Agent::new("n", role, Category::Logic);
            assert!(validate(&agent, &workflow).is_pass(), "{role} should pass");
        }
    }

    #[test]
    fn test_missing_tools_wins_over_missing_tasks() {
        let agent = Agent::new("A", "retriever", Category::Agent);
        let verdict = validate(&agent, &empty_workflow());
        let diagnosis = verdict.diagnosis().unwrap();
        assert!(diagnosis.error.contains("missing tools"));
        assert!(diagnosis.solution.contains("vertex_ai_search"));
    }

    #[test]
    fn test_missing_tasks() {
        let agent = Agent::new("A", "planner", Category::Agent).with_tools(["cloud_functions"]);
        let verdict = validate(&agent, &empty_workflow());
        assert!(verdict.diagnosis().unwrap().error.contains("missing tasks"));
    }

    #[test]
    fn test_retriever_needs_retrieval_tool() {
        let agent = Agent::new("R", "web_retriever", Category::Agent)
            .with_tools(["google_docs_api"])
            .with_tasks(["find"]);
        let verdict = validate(&agent, &empty_workflow());
        let diagnosis = verdict.diagnosis().unwrap();
        assert!(diagnosis.error.contains("data retrieval tools"));
        assert!(diagnosis.solution.contains("bigquery_connector"));

        let fixed = agent.with_tools(["file_search"]);
        assert!(validate(&fixed, &empty_workflow()).is_pass());
    }

    #[test]
    fn test_analyst_and_summarizer_rules() {
        let analyst = Agent::new("An", "data_analyst", Category::Agent)
            .with_tools(["vertex_ai_search"])
            .with_tasks(["analyze"]);
        assert!(validate(&analyst, &empty_workflow())
            .diagnosis()
            .unwrap()
            .error
            .contains("analysis tools"));

        let summarizer = Agent::new("S", "summarizer", Category::Agent)
            .with_tools(["google_sheets_api"])
            .with_tasks(["summarize"]);
        assert!(validate(&summarizer, &empty_workflow()).is_pass());
    }

    #[test]
    fn test_unknown_role_with_tools_and_tasks_passes() {
        let agent = Agent::new("P", "planner", Category::Agent)
            .with_tools(["anything"])
            .with_tasks(["plan"]);
        assert_eq!(validate(&agent, &empty_workflow()), Verdict::Pass);
    }

    #[test]
    fn test_custom_rule_is_appended() {
        struct NoModelRule;
        impl ValidationRule for NoModelRule {
            fn check(&self, agent: &Agent, _workflow: &Workflow) -> Option<Verdict> {
                agent
                    .model
                    .is_none()
                    .then(|| Verdict::fail("no model", "set 'model'"))
            }
        }

        let validator = NodeValidator::new().with_rule(NoModelRule);
        let agent = Agent::new("P", "planner", Category::Agent)
            .with_tools(["x"])
            .with_tasks(["y"]);
        assert!(!validator.validate(&agent, &empty_workflow()).is_pass());
    }
}
