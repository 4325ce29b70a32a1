//! Run board - folds the update stream into node statuses, logs and edge flows

use crate::core::{LogLine, NodeStatus, RunSummary, Update, Workflow};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Current view of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub name: String,
    pub role: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

/// Cumulative transfers along one edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMetric {
    pub from: String,
    pub to: String,
    pub packet_count: u64,
    pub total_kb: f64,
}

fn edge_key(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}

/// Consumer-side state of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunBoard {
    nodes: Vec<NodeView>,
    logs: Vec<LogLine>,
    flows: BTreeMap<String, FlowMetric>,
    waiting: Option<String>,
    summary: Option<RunSummary>,
}

impl RunBoard {
    /// Board with every declared node pending
    pub fn new(workflow: &Workflow) -> Self {
        let nodes = workflow
            .agents
            .iter()
            .map(|agent| NodeView {
                name: agent.name.clone(),
                role: agent.role.to_string(),
                status: NodeStatus::Pending,
                error: None,
                solution: None,
            })
            .collect();

        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Fold one record into the board
    pub fn apply(&mut self, update: &Update) {
        // Any record after a suspension means the run moved on
        self.waiting = None;

        if let Some(log) = &update.log {
            self.logs.push(log.clone());
        }

        if let Some(change) = &update.status {
            match self.nodes.iter_mut().find(|node| node.name == change.node_name) {
                Some(node) => {
                    node.status = change.status;
                    node.error = change.error.clone();
                    node.solution = change.solution.clone();
                }
                None => log::debug!("Status for unknown node '{}'", change.node_name),
            }
        }

        if let Some(data) = &update.data {
            let metric = self
                .flows
                .entry(edge_key(&data.from, &data.to))
                .or_insert_with(|| FlowMetric {
                    from: data.from.clone(),
                    to: data.to.clone(),
                    packet_count: 0,
                    total_kb: 0.0,
                });
            metric.packet_count += u64::from(data.packet_count);
            metric.total_kb += data.size_kb;
        }

        if let Some(suspend) = &update.suspend {
            self.waiting = Some(suspend.node_name.clone());
        }

        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.node(name).map(|node| node.status)
    }

    pub fn node(&self, name: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn nodes(&self) -> &[NodeView] {
        &self.nodes
    }

    pub fn flow(&self, from: &str, to: &str) -> Option<&FlowMetric> {
        self.flows.get(&edge_key(from, to))
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowMetric> {
        self.flows.values()
    }

    pub fn logs(&self) -> &[LogLine] {
        &self.logs
    }

    /// Node the run is parked at, if any
    pub fn waiting(&self) -> Option<&str> {
        self.waiting.as_deref()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Number of nodes currently in `status`
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|node| node.status == status).count()
    }

    /// Clear everything for a fresh run
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.status = NodeStatus::Pending;
            node.error = None;
            node.solution = None;
        }
        self.logs.clear();
        self.flows.clear();
        self.waiting = None;
        self.summary = None;
    }

    /// Plain-text table of node statuses and edge flows
    pub fn render_table(&self) -> String {
        let width = self
            .nodes
            .iter()
            .map(|node| node.name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:<14}  STATUS", "NODE", "ROLE");
        for node in &self.nodes {
            let _ = write!(out, "{:<width$}  {:<14}  {}", node.name, node.role, node.status);
            if let Some(error) = &node.error {
                let _ = write!(out, "  ({})", error);
            }
            out.push('\n');
        }

        if !self.flows.is_empty() {
            out.push('\n');
            for metric in self.flows.values() {
                let _ = writeln!(
                    out,
                    "{} -> {}: {} packet(s), {:.1} KB",
                    metric.from, metric.to, metric.packet_count, metric.total_kb
                );
            }
        }
        out
    }
}
