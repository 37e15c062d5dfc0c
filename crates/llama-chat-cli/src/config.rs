//! CLI configuration, persisted as JSON.

use std::path::{Path, PathBuf};

use anyhow::Context;
use llama_chat::{SessionConfig, TurnOptions};
use serde::{Deserialize, Serialize};

/// Defaults for `run` and `generate`; command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub session: SessionConfig,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// System prompt added at the start of every conversation.
    #[serde(default)]
    pub system: Option<String>,
}

fn default_temperature() -> f32 {
    TurnOptions::default().temperature
}
fn default_max_tokens() -> u32 {
    TurnOptions::default().max_tokens
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system: None,
        }
    }
}

impl CliConfig {
    /// Platform config directory: `~/.config/llama-chat/`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llama-chat")
    }

    /// `explicit`, or `config.json` in [`CliConfig::config_dir`].
    pub fn path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::config_dir().join("config.json"))
    }

    /// Load the config file. A missing default file yields defaults; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
        }
        Self::load_or_default(&Self::path(explicit))
    }

    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Update one key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "n_ctx" => self.session.n_ctx = value.parse()?,
            "n_batch" => self.session.n_batch = value.parse()?,
            "n_threads" => self.session.n_threads = Some(value.parse()?),
            "n_gpu_layers" => self.session.n_gpu_layers = value.parse()?,
            "seed" => self.session.seed = value.parse()?,
            "temperature" => self.temperature = value.parse()?,
            "max_tokens" => self.max_tokens = value.parse()?,
            "system" => self.system = Some(value.to_string()).filter(|s| !s.is_empty()),
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load_or_default(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, CliConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(CliConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "n_ctx": 4096, "temperature": 0.2 }"#).unwrap();

        let cfg = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.session.n_ctx, 4096);
        assert_eq!(cfg.session.n_batch, 2048);
        assert_eq!(cfg.temperature, 0.2);
        assert_eq!(cfg.max_tokens, default_max_tokens());
        assert!(cfg.system.is_none());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = CliConfig::default();
        cfg.set("seed", "7").unwrap();
        cfg.set("system", "Be terse.").unwrap();
        cfg.save(&path).unwrap();

        let loaded = CliConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.session.seed, 7);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ n_ctx: ").unwrap();
        assert!(CliConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut cfg = CliConfig::default();
        assert!(cfg.set("port", "8080").is_err());
        assert!(cfg.set("n_ctx", "lots").is_err());
        cfg.set("system", "").unwrap();
        assert!(cfg.system.is_none());
    }
}
