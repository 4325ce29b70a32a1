//! Update records emitted by the simulation engine
//!
//! Each record carries at most one of each part; consumers fold them into
//! their own view (see `board::RunBoard`).

use super::validator::Diagnosis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name used for run-level log lines
pub const SYSTEM_NODE: &str = "System";

/// Tone of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Success => write!(f, " OK "),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub kind: LogKind,
    pub message: String,
    pub node_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Display status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub node_name: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

/// One simulated transfer along an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSample {
    pub from: String,
    pub to: String,
    pub packet_count: u32,
    pub size_kb: f64,
}

/// The run will not advance until the caller pulls again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub node_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Close-out counts. `failed` includes skipped nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unreached: usize,
}

/// A single record in the engine's stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend: Option<Suspension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl Update {
    pub fn log(kind: LogKind, node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            log: Some(LogLine {
                kind,
                message: message.into(),
                node_name: node_name.into(),
                duration_ms: None,
            }),
            ..Self::default()
        }
    }

    pub fn info(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::log(LogKind::Info, node_name, message)
    }

    pub fn success(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::log(LogKind::Success, node_name, message)
    }

    pub fn warning(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::log(LogKind::Warning, node_name, message)
    }

    pub fn error(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::log(LogKind::Error, node_name, message)
    }

    /// Attach a duration to the log line, if any
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        if let Some(log) = self.log.as_mut() {
            log.duration_ms = Some(duration_ms);
        }
        self
    }

    pub fn status(node_name: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            status: Some(StatusChange {
                node_name: node_name.into(),
                status,
                error: None,
                solution: None,
            }),
            ..Self::default()
        }
    }

    pub fn failed(node_name: impl Into<String>, diagnosis: &Diagnosis) -> Self {
        Self {
            status: Some(StatusChange {
                node_name: node_name.into(),
                status: NodeStatus::Failed,
                error: Some(diagnosis.error.clone()),
                solution: Some(diagnosis.solution.clone()),
            }),
            ..Self::default()
        }
    }

    pub fn skipped(node_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: Some(StatusChange {
                node_name: node_name.into(),
                status: NodeStatus::Skipped,
                error: Some(reason.into()),
                solution: None,
            }),
            ..Self::default()
        }
    }

    pub fn data(from: impl Into<String>, to: impl Into<String>, size_kb: f64) -> Self {
        Self {
            data: Some(DataSample {
                from: from.into(),
                to: to.into(),
                packet_count: 1,
                size_kb,
            }),
            ..Self::default()
        }
    }

    pub fn suspend(node_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            suspend: Some(Suspension {
                node_name: node_name.into(),
                message,
            }),
            ..Self::default()
        }
    }

    pub fn summary(summary: RunSummary, log: LogLine) -> Self {
        Self {
            log: Some(log),
            summary: Some(summary),
            ..Self::default()
        }
    }

    pub fn is_suspension(&self) -> bool {
        self.suspend.is_some()
    }

    /// Serialize to JSON line
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::warn!("Failed to serialize update: {}", e);
            String::new()
        })
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(log) = &self.log {
            match log.duration_ms {
                Some(ms) => parts.push(format!(
                    "[{}] {}: {} ({} ms)",
                    log.kind, log.node_name, log.message, ms
                )),
                None => parts.push(format!("[{}] {}: {}", log.kind, log.node_name, log.message)),
            }
        }
        if let Some(change) = &self.status {
            parts.push(format!("{} -> {}", change.node_name, change.status));
        }
        if let Some(data) = &self.data {
            parts.push(format!(
                "{} => {} ({} packet, {:.1} KB)",
                data.from, data.to, data.packet_count, data.size_kb
            ));
        }
        if let Some(suspend) = &self.suspend {
            parts.push(format!(
                "paused at {}{}",
                suspend.node_name,
                suspend
                    .message
                    .as_deref()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            ));
        }
        write!(f, "{}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_serialization_skips_empty_parts() {
        let update = Update::status("Retriever", NodeStatus::Running);
        let json = update.to_json_line();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("Retriever"));
        assert!(!json.contains("log"));
        assert!(!json.contains("suspend"));
    }

    #[test]
    fn test_failed_status_carries_diagnosis() {
        let diagnosis = Diagnosis {
            error: "no tools".to_string(),
            solution: "add one".to_string(),
        };
        let update = Update::failed("A", &diagnosis);
        let change = update.status.unwrap();
        assert_eq!(change.status, NodeStatus::Failed);
        assert_eq!(change.error.as_deref(), Some("no tools"));
        assert_eq!(change.solution.as_deref(), Some("add one"));
    }

    #[test]
    fn test_json_line_with_non_finite_size() {
        let json = Update::data("A", "B", f64::NAN).to_json_line();
        assert!(!json.is_empty());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["data"]["from"], "A");
        assert!(value["data"]["size_kb"].is_null());
    }

    #[test]
    fn test_display() {
        let line = Update::success("A", "passed").with_duration_ms(120).to_string();
        assert_eq!(line, "[ OK ] A: passed (120 ms)");

        let pause = Update::suspend("Gate", Some("approve?".to_string())).to_string();
        assert_eq!(pause, "paused at Gate: approve?");
    }
}
