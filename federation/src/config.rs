//! Node configuration: every recognized field is an explicit struct member;
//! the `extra` map is the one documented extension point for orchestrators
//! that genuinely need open extensibility.

use std::{collections::BTreeMap, num::NonZeroUsize, path::PathBuf};

use serde::Deserialize;

use privacy::PrivacyConfig;

use crate::error::{FederationErr, Result};

/// A node's fixed role for its lifetime, derived from rank.
///
/// The server (rank 0) holds evaluation data only; clients (rank >= 1) hold
/// disjoint training partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Server,
    Client { id: usize },
}

/// Startup configuration for one node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// 0 for the server, >= 1 for clients.
    pub rank: usize,
    pub client_num_in_total: NonZeroUsize,
    /// Local dataset path template; `{rank}` and `{client_num_in_total}` are
    /// substituted per node.
    pub dataset_path: String,
    pub output_dir: PathBuf,
    #[serde(default = "default_comm_rounds")]
    pub comm_rounds: usize,
    #[serde(default = "default_local_epochs")]
    pub local_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    /// Unrecognized orchestrator-specific settings.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_comm_rounds() -> usize {
    1
}

fn default_local_epochs() -> usize {
    1
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

fn default_learning_rate() -> f32 {
    0.01
}

impl NodeConfig {
    /// Loads and validates a node configuration from a JSON file.
    ///
    /// # Errors
    /// Returns `FederationErr::Config` with a human-readable message if the
    /// file cannot be read, parsed or validated.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FederationErr::Config(format!("cannot read '{path}': {e}")))?;

        let config: NodeConfig = serde_json::from_str(&content)
            .map_err(|e| FederationErr::Config(format!("invalid JSON in '{path}': {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.rank > self.client_num_in_total.get() {
            return Err(FederationErr::Config(format!(
                "rank ({}) exceeds client_num_in_total ({})",
                self.rank, self.client_num_in_total
            )));
        }

        if self.comm_rounds == 0 {
            return Err(FederationErr::Config(
                "comm_rounds must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn role(&self) -> NodeRole {
        match self.rank {
            0 => NodeRole::Server,
            rank => NodeRole::Client { id: rank - 1 },
        }
    }

    /// Resolves the dataset path template for this node.
    pub fn resolve_dataset_path(&self) -> String {
        self.dataset_path
            .replace("{rank}", &self.rank.to_string())
            .replace(
                "{client_num_in_total}",
                &self.client_num_in_total.to_string(),
            )
    }
}
