use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for one specialization + unboxing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnboxConfig {
    /// Dump the full term assignment after each solve
    pub debug: bool,
    /// Deepest boxing layer a run will try to remove
    pub max_depth: usize,
}

impl UnboxConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for UnboxConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_depth: 4,
        }
    }
}
