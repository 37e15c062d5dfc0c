//! Session configuration, fixed when a session is opened.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Seed used by the categorical sampling stage unless configured otherwise.
pub const DEFAULT_SEED: u32 = 12345;

/// Parameters recognized when a session is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Context window in tokens.
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    /// Maximum tokens submitted in one prefill decode call.
    #[serde(default = "default_n_batch")]
    pub n_batch: u32,
    /// Worker threads. `None` = half the available hardware parallelism.
    #[serde(default)]
    pub n_threads: Option<i32>,
    /// Layers to offload to GPU. -1 = all.
    #[serde(default = "default_gpu_layers")]
    pub n_gpu_layers: i32,
    /// Seed for the categorical sampling stage.
    #[serde(default = "default_seed")]
    pub seed: u32,
}

fn default_n_ctx() -> u32 {
    8192
}
fn default_n_batch() -> u32 {
    2048
}
fn default_gpu_layers() -> i32 {
    -1
}
fn default_seed() -> u32 {
    DEFAULT_SEED
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            n_ctx: default_n_ctx(),
            n_batch: default_n_batch(),
            n_threads: None,
            n_gpu_layers: default_gpu_layers(),
            seed: default_seed(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON object; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Thread count actually handed to the engine.
    pub fn threads(&self) -> i32 {
        self.n_threads.filter(|&n| n > 0).unwrap_or_else(|| {
            let hw = std::thread::available_parallelism()
                .map(|n| n.get() as i32)
                .unwrap_or(4);
            (hw / 2).max(1)
        })
    }
}
