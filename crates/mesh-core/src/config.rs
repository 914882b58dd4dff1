//! Configuration: the constants of §6, as a loadable, overridable struct.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshtalk/config.toml
//!   3. ~/.config/meshtalk/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunable constants governing the core. All have sane defaults; every field
/// is also overridable via a `MESH_<FIELD>` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeshConfig {
    pub max_hops: u8,
    pub max_message_size: usize,
    pub message_ttl_ms: u64,
    pub handshake_timeout_ms: u64,
    pub route_timeout_ms: u64,
    pub peer_timeout_ms: u64,
    pub bloom_filter_size: usize,
    pub bloom_hash_count: u32,
    pub max_peers: usize,
    pub max_session_age_ms: u64,
    pub max_message_count: u64,
    pub max_routes: usize,
    pub dedup_lru_capacity: usize,
    pub bloom_grace_period_ms: u64,
    pub sf_max_per_recipient: usize,
    pub sf_max_total_messages: usize,
    pub sf_retention_ms: u64,
    pub fragment_mtu: usize,
    pub fragment_reassembly_timeout_ms: u64,
    pub identity_keypair_path: PathBuf,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_hops: 7,
            max_message_size: 65_535,
            message_ttl_ms: 300_000,
            handshake_timeout_ms: 10_000,
            route_timeout_ms: 30_000,
            peer_timeout_ms: 60_000,
            bloom_filter_size: 8192,
            bloom_hash_count: 4,
            max_peers: 256,
            max_session_age_ms: 86_400_000,
            max_message_count: 1_000_000,
            max_routes: 512,
            dedup_lru_capacity: 2048,
            bloom_grace_period_ms: 60_000,
            sf_max_per_recipient: 100,
            sf_max_total_messages: 10_000,
            sf_retention_ms: 7 * 24 * 60 * 60 * 1000,
            fragment_mtu: 480,
            fragment_reassembly_timeout_ms: 30_000,
            identity_keypair_path: config_dir().join("keypair"),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshtalk")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("MESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESH_MAX_HOPS") {
            if let Ok(p) = v.parse() {
                self.max_hops = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(p) = v.parse() {
                self.handshake_timeout_ms = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_BLOOM_GRACE_PERIOD_MS") {
            if let Ok(p) = v.parse() {
                self.bloom_grace_period_ms = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_SF_RETENTION_MS") {
            if let Ok(p) = v.parse() {
                self.sf_retention_ms = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_MAX_PEERS") {
            if let Ok(p) = v.parse() {
                self.max_peers = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = MeshConfig::default();
        assert_eq!(config.max_hops, 7);
        assert_eq!(config.max_message_size, 65_535);
        assert_eq!(config.max_session_age_ms, 86_400_000);
        assert_eq!(config.max_message_count, 1_000_000);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("meshtalk-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("MESH_CONFIG", config_path.to_str().unwrap());
        }

        let path = MeshConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = MeshConfig::load().expect("load should succeed");
        assert_eq!(config.max_hops, 7);

        unsafe {
            std::env::remove_var("MESH_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = MeshConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: MeshConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}
