//! Configuration for flakenet-node, parsed from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use flakenet_p2p::P2pConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub p2p: P2pConfig,
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
