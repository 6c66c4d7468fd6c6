//! Engine configuration
//!
//! Tunables for propagation, context compression, and node placement.
//! Every field has a default, so a partial JSON file is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

/// Default values for engine configuration
pub mod defaults {
    /// Per-call handler budget before the call is treated as failed
    pub const HANDLER_TIMEOUT_MS: u64 = 30_000;
    /// Contexts whose JSON is larger than this are stored compressed (200 KiB)
    pub const COMPRESSION_THRESHOLD_BYTES: usize = 200 * 1024;
    /// zstd level used for compressed contexts
    pub const COMPRESSION_LEVEL: i32 = 3;
    /// Minimum distance kept between a placed node and the viewport edge
    pub const VIEWPORT_MARGIN: f64 = 50.0;
    /// Horizontal gap between sibling children
    pub const CHILD_GAP_X: f64 = 50.0;
    /// Vertical gap between a parent's bottom edge and its children
    pub const CHILD_GAP_Y: f64 = 160.0;
}

/// Configuration for the propagation engine and mutation façade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub handler_timeout_ms: u64,
    pub compression_threshold_bytes: usize,
    pub compression_level: i32,
    pub viewport_margin: f64,
    pub child_gap_x: f64,
    pub child_gap_y: f64,
    /// Save the flow after every mutation
    pub autosave: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: defaults::HANDLER_TIMEOUT_MS,
            compression_threshold_bytes: defaults::COMPRESSION_THRESHOLD_BYTES,
            compression_level: defaults::COMPRESSION_LEVEL,
            viewport_margin: defaults::VIEWPORT_MARGIN,
            child_gap_x: defaults::CHILD_GAP_X,
            child_gap_y: defaults::CHILD_GAP_Y,
            autosave: true,
        }
    }
}

impl EngineConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Load configuration from a JSON file, falling back to defaults if absent
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No engine config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration to a JSON file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).await?;
        log::info!("Engine configuration saved to {:?}", path);
        Ok(())
    }
}
