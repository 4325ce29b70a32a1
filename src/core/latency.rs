//! Latency Sampler - simulated processing time per node

use super::graph::Agent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Inclusive millisecond range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    fn draw(&self, rng: &mut impl Rng) -> f64 {
        if self.max_ms <= self.min_ms {
            return self.min_ms as f64;
        }
        rng.gen_range(self.min_ms as f64..=self.max_ms as f64)
    }
}

/// Per-tool latency ranges with a fallback for unknown tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyTable {
    /// Entries given in config are layered over the built-in table
    #[serde(deserialize_with = "merge_over_builtin")]
    pub tools: HashMap<String, LatencyRange>,
    pub fallback: LatencyRange,
}

fn merge_over_builtin<'de, D>(deserializer: D) -> Result<HashMap<String, LatencyRange>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = HashMap::<String, LatencyRange>::deserialize(deserializer)?;
    let mut tools = LatencyTable::default().tools;
    tools.extend(overrides);
    Ok(tools)
}

impl Default for LatencyTable {
    fn default() -> Self {
        let tools = [
            ("bigquery_connector", LatencyRange::new(800, 2000)),
            ("vertex_ai_search", LatencyRange::new(600, 1500)),
            ("cloud_functions", LatencyRange::new(200, 500)),
            ("google_docs_api", LatencyRange::new(400, 900)),
            ("google_slides_api", LatencyRange::new(500, 1200)),
            ("vertex_ai_embeddings", LatencyRange::new(700, 1800)),
        ]
        .into_iter()
        .map(|(name, range)| (name.to_string(), range))
        .collect();

        Self {
            tools,
            fallback: LatencyRange::new(150, 400),
        }
    }
}

impl LatencyTable {
    pub fn range_for(&self, tool: &str) -> LatencyRange {
        self.tools.get(tool).copied().unwrap_or(self.fallback)
    }
}

/// Source of simulated node durations
pub trait LatencySampler: Send {
    fn sample(&mut self, agent: &Agent) -> Duration;
}

/// Samples from the tool latency table
pub struct ToolLatencySampler {
    table: LatencyTable,
    logic_latency: Duration,
    rng: StdRng,
}

impl ToolLatencySampler {
    pub fn new(table: LatencyTable, logic_latency: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            table,
            logic_latency,
            rng,
        }
    }
}

impl Default for ToolLatencySampler {
    fn default() -> Self {
        Self::new(LatencyTable::default(), Duration::from_millis(100), None)
    }
}

impl LatencySampler for ToolLatencySampler {
    fn sample(&mut self, agent: &Agent) -> Duration {
        if !agent.category.does_work() {
            return self.logic_latency;
        }
        if agent.tools.is_empty() {
            return Duration::from_millis(self.table.fallback.min_ms);
        }

        let total_ms: f64 = agent
            .tool_names()
            .map(|tool| self.table.range_for(tool).draw(&mut self.rng))
            .sum();
        Duration::from_micros((total_ms * 1000.0).round() as u64)
    }
}

/// Same duration for every node
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLatency(pub Duration);

impl LatencySampler for FixedLatency {
    fn sample(&mut self, _agent: &Agent) -> Duration {
        self.0
    }
}
