// Configuration management for the arcollab CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/arcollab/config.json
// - Linux: ~/.config/arcollab/config.json
// - Windows: %APPDATA%\arcollab\config.json

use anyhow::{Context, Result};
use arcollab_core::{CapabilityPolicy, EncryptionPreference, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings handed to every session coordinator
    pub session: SessionConfig,

    /// Settings for `arcollab demo`
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of in-process peers
    pub peers: usize,

    /// Milliseconds to wait for payloads after sending
    pub settle_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            settle_ms: 250,
        }
    }
}

pub fn parse_encryption(value: &str) -> Result<EncryptionPreference> {
    match value {
        "required" => Ok(EncryptionPreference::Required),
        "optional" => Ok(EncryptionPreference::Optional),
        "disabled" => Ok(EncryptionPreference::Disabled),
        _ => anyhow::bail!("Invalid encryption preference (required, optional, disabled): {}", value),
    }
}

pub fn parse_capability_policy(value: &str) -> Result<CapabilityPolicy> {
    match value {
        "fatal" => Ok(CapabilityPolicy::Fatal),
        "reject-peer" => Ok(CapabilityPolicy::RejectPeer),
        _ => anyhow::bail!("Invalid capability policy (fatal, reject-peer): {}", value),
    }
}

fn encryption_name(value: EncryptionPreference) -> &'static str {
    match value {
        EncryptionPreference::Required => "required",
        EncryptionPreference::Optional => "optional",
        EncryptionPreference::Disabled => "disabled",
    }
}

fn capability_policy_name(value: CapabilityPolicy) -> &'static str {
    match value {
        CapabilityPolicy::Fatal => "fatal",
        CapabilityPolicy::RejectPeer => "reject-peer",
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("arcollab");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, or write and return the default if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .session
                .validate()
                .context("Config file holds an invalid session config")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value; the result must still be a valid session config
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "namespace" => updated.session.namespace = value.to_string(),
            "display_name" => updated.session.display_name = value.to_string(),
            "invitation_timeout_secs" => {
                updated.session.invitation_timeout_secs =
                    value.parse().context("Invalid number of seconds")?;
            }
            "encryption" => updated.session.encryption = parse_encryption(value)?,
            "unsupported_capability" => {
                updated.session.unsupported_capability = parse_capability_policy(value)?;
            }
            "auto_start" => {
                updated.session.auto_start = value.parse().context("Invalid boolean value")?;
            }
            "demo.peers" => {
                updated.demo.peers = value.parse().context("Invalid number")?;
                anyhow::ensure!(updated.demo.peers >= 2, "A demo needs at least two peers");
            }
            "demo.settle_ms" => {
                updated.demo.settle_ms = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.session.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("namespace".to_string(), self.session.namespace.clone()),
            ("display_name".to_string(), self.session.display_name.clone()),
            (
                "invitation_timeout_secs".to_string(),
                self.session.invitation_timeout_secs.to_string(),
            ),
            (
                "encryption".to_string(),
                encryption_name(self.session.encryption).to_string(),
            ),
            (
                "unsupported_capability".to_string(),
                capability_policy_name(self.session.unsupported_capability).to_string(),
            ),
            ("auto_start".to_string(), self.session.auto_start.to_string()),
            ("demo.peers".to_string(), self.demo.peers.to_string()),
            ("demo.settle_ms".to_string(), self.demo.settle_ms.to_string()),
        ]
    }
}
