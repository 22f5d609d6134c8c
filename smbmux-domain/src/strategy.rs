use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SmbError;

// ---------------------------------------------------------------------------
// LoadBalancingStrategy
// ---------------------------------------------------------------------------

/// Policy for picking one channel out of a session's channel group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    // ---
    /// Cycle through channels using a shared wrapping cursor.
    #[default]
    RoundRobin,

    /// Channel with the fewest active requests; ties go to the earliest.
    LeastConnections,

    /// Uniformly random channel.
    Random,

    /// Random, weighted towards channels with fewer active requests and a
    /// lower error rate.
    WeightedRandom,

    /// Always the primary channel, i.e. the first one added.
    FailoverOnly,
}

// ---

impl LoadBalancingStrategy {
    // ---
    pub fn as_str(self) -> &'static str {
        // ---
        match self {
            LoadBalancingStrategy::RoundRobin => "round_robin",
            LoadBalancingStrategy::LeastConnections => "least_connections",
            LoadBalancingStrategy::Random => "random",
            LoadBalancingStrategy::WeightedRandom => "weighted_random",
            LoadBalancingStrategy::FailoverOnly => "failover_only",
        }
    }
}

// ---

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---

impl FromStr for LoadBalancingStrategy {
    type Err = SmbError;

    /// Accepts `snake_case`, `kebab-case` and `SCREAMING_CASE` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "round_robin" => Ok(LoadBalancingStrategy::RoundRobin),
            "least_connections" => Ok(LoadBalancingStrategy::LeastConnections),
            "random" => Ok(LoadBalancingStrategy::Random),
            "weighted_random" => Ok(LoadBalancingStrategy::WeightedRandom),
            "failover_only" => Ok(LoadBalancingStrategy::FailoverOnly),
            _ => Err(SmbError::InvalidArgument(format!(
                "unknown load balancing strategy '{s}'"
            ))),
        }
    }
}

// ---
