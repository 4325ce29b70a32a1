//! Graph model - parses workflow YAML into agents and flow links

use super::error::SimError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;

/// Node role tag. Known roles drive branching and structural behavior,
/// anything else is a working role such as `retriever` or `planner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Start,
    IfElse,
    While,
    UserApproval,
    End,
    Note,
    SetState,
    Guardrails,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::IfElse => "if_else",
            Self::While => "while",
            Self::UserApproval => "user_approval",
            Self::End => "end",
            Self::Note => "note",
            Self::SetState => "set_state",
            Self::Guardrails => "guardrails",
            Self::Custom(role) => role,
        }
    }

    /// Branching, structural and logic roles carry no tools or tasks to check
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value {
            "start" => Self::Start,
            "if_else" => Self::IfElse,
            "while" => Self::While,
            "user_approval" => Self::UserApproval,
            "end" => Self::End,
            "note" => Self::Note,
            "set_state" => Self::SetState,
            "guardrails" => Self::Guardrails,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Core,
    Tool,
    Logic,
    Data,
    Agent,
}

impl Default for Category {
    fn default() -> Self {
        Self::Agent
    }
}

impl Category {
    /// Core and agent nodes do tool-bound work; the rest are quick hops
    pub fn does_work(&self) -> bool {
        matches!(self, Self::Core | Self::Agent)
    }
}

/// A tool reference: either a bare name or a detailed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolRef {
    Name(String),
    Spec(ToolSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl ToolRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Spec(spec) => &spec.name,
        }
    }

    pub fn is_interactive(&self) -> bool {
        match self {
            Self::Name(_) => false,
            Self::Spec(spec) => spec.interactive.unwrap_or(false),
        }
    }
}

impl From<&str> for ToolRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// A workflow node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: Role,
    #[serde(rename = "type", alias = "category", default)]
    pub category: Category,
    #[serde(default)]
    pub description: String,
    pub model: Option<String>,
    pub context: Option<String>,
    pub condition: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<Role>, category: Category) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            category,
            description: String::new(),
            model: None,
            context: None,
            condition: None,
            tools: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_tools<I, T>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToolRef>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(ToolRef::name)
    }
}

/// Output port on a link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PortRepr", into = "String")]
pub enum Port {
    True,
    False,
    Loop,
    Exit,
    Default,
    Named(String),
}

impl Port {
    pub fn as_str(&self) -> &str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Loop => "loop",
            Self::Exit => "exit",
            Self::Default => "default",
            Self::Named(name) => name,
        }
    }
}

impl From<bool> for Port {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl From<String> for Port {
    fn from(value: String) -> Self {
        match value.as_str() {
            "true" => Self::True,
            "false" => Self::False,
            "loop" => Self::Loop,
            "exit" => Self::Exit,
            "default" => Self::Default,
            _ => Self::Named(value),
        }
    }
}

/// Authors write `port: true` as often as `port: "true"`
#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Flag(bool),
    Text(String),
}

impl From<PortRepr> for Port {
    fn from(repr: PortRepr) -> Self {
        match repr {
            PortRepr::Flag(flag) => Self::from(flag),
            PortRepr::Text(text) => Self::from(text),
        }
    }
}

impl From<Port> for String {
    fn from(port: Port) -> Self {
        port.as_str().to_string()
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge from one node to one or more targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLink {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowLink {
    pub fn new<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
            port: None,
            label: None,
        }
    }

    pub fn on_port(mut self, port: Port) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Links without a port, or on `default`, are plain successor edges
    pub fn is_default_route(&self) -> bool {
        matches!(self.port, None | Some(Port::Default))
    }
}

/// The `flow` section: a link list, or anything else the author wrote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flow {
    Links(Vec<FlowLink>),
    Malformed(serde_yaml::Value),
}

impl Default for Flow {
    fn default() -> Self {
        Self::Links(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub backend: Option<String>,
    pub embedding_model: Option<String>,
}

/// Workflow graph: declared agents plus flow links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub flow: Flow,
    pub communication: Option<serde_yaml::Value>,
    pub memory: Option<MemorySpec>,
    pub deployment: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct WorkflowDocument {
    system: Option<Workflow>,
}

impl Workflow {
    /// Build a workflow in code
    pub fn new(name: impl Into<String>, agents: Vec<Agent>, links: Vec<FlowLink>) -> Self {
        Self {
            name: name.into(),
            description: None,
            agents,
            flow: Flow::Links(links),
            communication: None,
            memory: None,
            deployment: None,
        }
    }

    /// Load workflow from a YAML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        Self::from_yaml_str(&content)
    }

    /// Parse a YAML document with a `system` root key
    pub fn from_yaml_str(content: &str) -> crate::Result<Self> {
        let document: WorkflowDocument =
            serde_yaml::from_str(content).map_err(SimError::from)?;
        let workflow = document.system.ok_or(SimError::MissingSystemRoot)?;
        Ok(workflow)
    }

    pub fn to_yaml(&self) -> crate::Result<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            system: &'a Workflow,
        }
        Ok(serde_yaml::to_string(&Out { system: self })?)
    }

    /// Get agent by name
    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    /// Flow links, or a structural error if the flow is not a link list
    pub fn links(&self) -> Result<&[FlowLink], SimError> {
        match &self.flow {
            Flow::Links(links) => Ok(links),
            Flow::Malformed(_) => Err(SimError::InvalidFlow),
        }
    }

    fn link_slice(&self) -> &[FlowLink] {
        self.links().unwrap_or(&[])
    }

    /// Count incoming link targets for every declared agent
    pub fn in_degrees(&self) -> Result<HashMap<&str, usize>, SimError> {
        let mut degrees: HashMap<&str, usize> = self
            .agents
            .iter()
            .map(|agent| (agent.name.as_str(), 0))
            .collect();

        for link in self.links()? {
            for target in &link.to {
                if let Some(count) = degrees.get_mut(target.as_str()) {
                    *count += 1;
                }
            }
        }

        Ok(degrees)
    }

    /// Agents with no incoming links, in declaration order
    pub fn entry_points(&self) -> Result<Vec<&str>, SimError> {
        let degrees = self.in_degrees()?;
        Ok(self
            .agents
            .iter()
            .map(|agent| agent.name.as_str())
            .filter(|name| degrees.get(name).copied() == Some(0))
            .collect())
    }

    /// Targets of the default-route links leaving `from`
    pub fn default_successors(&self, from: &str) -> Vec<String> {
        self.successors_where(from, FlowLink::is_default_route)
    }

    /// Targets of the links leaving `from` on `port`
    pub fn port_successors(&self, from: &str, port: &Port) -> Vec<String> {
        self.successors_where(from, |link| link.port.as_ref() == Some(port))
    }

    fn successors_where<F>(&self, from: &str, keep: F) -> Vec<String>
    where
        F: Fn(&FlowLink) -> bool,
    {
        self.link_slice()
            .iter()
            .filter(|link| link.from == from && keep(link))
            .flat_map(|link| link.to.iter().cloned())
            .collect()
    }

    /// Sources of every link that names `name` as a target
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.link_slice()
            .iter()
            .filter(|link| link.to.iter().any(|target| target == name))
            .map(|link| link.from.as_str())
            .collect()
    }

    /// Nodes reachable from the `loop` port of `name` without passing back
    /// through `name` itself
    pub fn loop_body(&self, name: &str) -> HashSet<String> {
        let mut body = HashSet::new();
        let mut frontier: VecDeque<String> = self.port_successors(name, &Port::Loop).into();

        while let Some(next) = frontier.pop_front() {
            if next == name || !body.insert(next.clone()) {
                continue;
            }
            for link in self.link_slice().iter().filter(|link| link.from == next) {
                frontier.extend(link.to.iter().cloned());
            }
        }

        body
    }
}
