use crate::producer::ProducerDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where the encryption key comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    #[default]
    None,
    /// PBKDF2-HMAC-SHA256 over the configured password with a random salt.
    Password,
    /// Random key held in memory only; files do not survive a restart.
    Generated,
    /// Platform secure store; falls back to `Generated` when unavailable.
    SecureStore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled:        bool,
    pub key_source:     KeySource,
    pub password:       Option<String>,
    pub kdf_iterations: u32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled:        false,
            key_source:     KeySource::None,
            password:       None,
            kdf_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// One `scene_<name>.sav` per scene plus `world.sav` for the rest.
    #[default]
    PerScene,
    /// Everything in a single `world.sav`.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstantSaveConfig {
    pub enabled:  bool,
    pub delay_ms: u64,
}

impl Default for InstantSaveConfig {
    fn default() -> Self {
        Self { enabled: true, delay_ms: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaveConfig {
    pub root_folder:                 PathBuf,
    pub default_slot:                String,
    pub compression:                 bool,
    pub encryption:                  EncryptionConfig,
    pub autosave_interval_secs:      u64,
    pub save_on_pause:               bool,
    pub save_on_focus_loss:          bool,
    pub save_on_quit:                bool,
    pub payload_mode:                PayloadMode,
    pub max_backups:                 usize,
    pub crash_detection_window_secs: u64,
    pub auto_repair:                 bool,
    pub instant_save:                InstantSaveConfig,
    pub offline_catch_up:            bool,
    pub max_offline_secs:            u64,
    pub top_resource_count:          usize,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            root_folder:                 PathBuf::from("saves"),
            default_slot:                "slot_0".into(),
            compression:                 true,
            encryption:                  EncryptionConfig::default(),
            autosave_interval_secs:      60,
            save_on_pause:               true,
            save_on_focus_loss:          true,
            save_on_quit:                true,
            payload_mode:                PayloadMode::PerScene,
            max_backups:                 3,
            crash_detection_window_secs: 5,
            auto_repair:                 true,
            instant_save:                InstantSaveConfig::default(),
            offline_catch_up:            true,
            max_offline_secs:            24 * 60 * 60,
            top_resource_count:          5,
        }
    }
}

impl SaveConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    /// In tests, use SaveConfig::default_test().
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: SaveConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid save config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with fast defaults for unit tests: no background timers,
    /// a cheap KDF and no instant-save delay worth waiting on.
    pub fn default_test(root: impl Into<PathBuf>) -> Self {
        Self {
            root_folder:                 root.into(),
            default_slot:                "test".into(),
            compression:                 false,
            encryption:                  EncryptionConfig {
                kdf_iterations: 1_000,
                ..EncryptionConfig::default()
            },
            autosave_interval_secs:      1,
            crash_detection_window_secs: 2,
            instant_save:                InstantSaveConfig { enabled: false, delay_ms: 20 },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encryption.enabled {
            match self.encryption.key_source {
                KeySource::None => {
                    anyhow::bail!("encryption enabled but key_source is none")
                }
                KeySource::Password if self.encryption.password.as_deref().unwrap_or("").is_empty() => {
                    anyhow::bail!("key_source password requires a non-empty password")
                }
                _ => {}
            }
            if self.encryption.kdf_iterations == 0 {
                anyhow::bail!("kdf_iterations must be > 0");
            }
        }
        if !crate::types::validate_slot_id(&self.default_slot) {
            anyhow::bail!("default_slot '{}' is not a valid slot id", self.default_slot);
        }
        Ok(())
    }
}

// ── Producer catalog ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProducerCatalog {
    pub definitions: Vec<ProducerDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProducerCatalogFile {
    producers: Vec<ProducerDefinition>,
}

impl ProducerCatalog {
    /// Load author-time producer definitions, e.g. `data/producers.json`:
    /// `{ "producers": [ { "id": ..., "output_resource": ..., ... } ] }`
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let file: ProducerCatalogFile = serde_json::from_str(&content)?;
        Self::from_definitions(file.producers)
    }

    pub fn from_definitions(definitions: Vec<ProducerDefinition>) -> anyhow::Result<Self> {
        let invalid = |v: f64| v.is_nan() || v < 0.0;
        let mut seen = BTreeSet::new();
        for def in &definitions {
            if !seen.insert(def.id.as_str()) {
                anyhow::bail!("duplicate producer id '{}'", def.id);
            }
            if invalid(def.capacity) || invalid(def.rate_per_sec) || invalid(def.decay_rate) {
                anyhow::bail!("producer '{}' has a negative or NaN rate, capacity or decay", def.id);
            }
        }
        Ok(Self { definitions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_takes_defaults() {
        let config: SaveConfig =
            serde_json::from_str(r#"{ "max_backups": 7, "payload_mode": "global" }"#).unwrap();
        assert_eq!(config.max_backups, 7);
        assert_eq!(config.payload_mode, PayloadMode::Global);
        assert_eq!(config.autosave_interval_secs, 60);
        assert_eq!(config.max_offline_secs, 86_400);
        assert!(config.instant_save.enabled);
    }

    #[test]
    fn password_source_requires_password() {
        let mut config = SaveConfig::default();
        config.encryption.enabled = true;
        config.encryption.key_source = KeySource::Password;
        assert!(config.validate().is_err());
        config.encryption.password = Some("hunter2".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn catalog_rejects_duplicate_ids() {
        let def = ProducerDefinition {
            id: "farm".into(),
            output_resource: "food".into(),
            rate_per_sec: 1.0,
            capacity: 10.0,
            passive: true,
            worker_count: 1,
            decay_rate: 0.0,
        };
        assert!(ProducerCatalog::from_definitions(vec![def.clone()]).is_ok());
        assert!(ProducerCatalog::from_definitions(vec![def.clone(), def]).is_err());
    }
}
