//! Randomness behind branch choices and transfer sizes

use super::graph::Agent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Inclusive kilobyte range for simulated transfers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min_kb: f64,
    pub max_kb: f64,
}

impl Default for SizeRange {
    fn default() -> Self {
        Self {
            min_kb: 5.0,
            max_kb: 25.0,
        }
    }
}

/// Source of the engine's coin flips
pub trait Entropy: Send {
    /// Outcome of an `if_else` node; the condition text is not evaluated
    fn branch(&mut self, agent: &Agent) -> bool;

    /// Size of one data transfer in KB
    fn transfer_kb(&mut self) -> f64;
}

/// `StdRng`-backed entropy, reproducible when seeded
pub struct SeededEntropy {
    rng: StdRng,
    sizes: SizeRange,
}

impl SeededEntropy {
    pub fn new(seed: Option<u64>, sizes: SizeRange) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, sizes }
    }
}

impl Default for SeededEntropy {
    fn default() -> Self {
        Self::new(None, SizeRange::default())
    }
}

impl Entropy for SeededEntropy {
    fn branch(&mut self, _agent: &Agent) -> bool {
        self.rng.gen_bool(0.5)
    }

    fn transfer_kb(&mut self) -> f64 {
        if self.sizes.max_kb <= self.sizes.min_kb {
            return self.sizes.min_kb;
        }
        self.rng.gen_range(self.sizes.min_kb..=self.sizes.max_kb)
    }
}

/// Replays a fixed list of branch outcomes, then repeats `fallback`
#[derive(Debug, Clone)]
pub struct ScriptedEntropy {
    branches: VecDeque<bool>,
    fallback: bool,
    transfer_kb: f64,
}

impl ScriptedEntropy {
    pub fn new(branches: impl IntoIterator<Item = bool>) -> Self {
        Self {
            branches: branches.into_iter().collect(),
            fallback: true,
            transfer_kb: 10.0,
        }
    }

    /// Every branch takes the same side
    pub fn always(outcome: bool) -> Self {
        Self {
            fallback: outcome,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_transfer_kb(mut self, kb: f64) -> Self {
        self.transfer_kb = kb;
        self
    }
}

impl Entropy for ScriptedEntropy {
    fn branch(&mut self, _agent: &Agent) -> bool {
        self.branches.pop_front().unwrap_or(self.fallback)
    }

    fn transfer_kb(&mut self) -> f64 {
        self.transfer_kb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Category;

    #[test]
    fn test_scripted_entropy_replays_then_falls_back() {
        let agent = Agent::new("C", "if_else", Category::Logic);
        let mut entropy = ScriptedEntropy::new([false, true]);
        assert!(!entropy.branch(&agent));
        assert!(entropy.branch(&agent));
        assert!(entropy.branch(&agent));

        let mut never = ScriptedEntropy::always(false).with_transfer_kb(7.5);
        assert!(!never.branch(&agent));
        assert_eq!(never.transfer_kb(), 7.5);
    }

    #[test]
    fn test_seeded_transfer_sizes_in_range() {
        let mut entropy = SeededEntropy::new(Some(9), SizeRange::default());
        for _ in 0..100 {
            let kb = entropy.transfer_kb();
            assert!((5.0..=25.0).contains(&kb));
        }
    }

    #[test]
    fn test_same_seed_same_branches() {
        let agent = Agent::new("C", "if_else", Category::Logic);
        let mut a = SeededEntropy::new(Some(11), SizeRange::default());
        let mut b = SeededEntropy::new(Some(11), SizeRange::default());
        let left: Vec<bool> = (0..16).map(|_| a.branch(&agent)).collect();
        let right: Vec<bool> = (0..16).map(|_| b.branch(&agent)).collect();
        assert_eq!(left, right);
    }
}
