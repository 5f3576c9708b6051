//! Config loaders for the two configuration surfaces: per-instance
//! `config.json` and the project-wide `streaming.yaml`.
//!
//! # Loading precedence (both surfaces)
//! 1. Defaults (`Default::default()`)
//! 2. File on disk (JSON for instances, YAML for streaming)
//! 3. Environment variables (double-underscore section delimiter)
//!
//! A config file that exists but fails to parse is a hard error here
//! (invalid configuration refuses to initialize), not a silent fallback to
//! defaults. A *missing* file is not an error — it's the common case for a
//! brand-new instance or an unconfigured streaming layer.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ConfigError;

use super::schema::{InstanceConfig, StreamingConfig};

pub fn instance_config_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join("config.json")
}

pub fn streaming_config_path(project_root: &Path) -> PathBuf {
    project_root.join("streaming.yaml")
}

/// Load one instance's `config.json`, falling back to defaults when the
/// file is simply absent, and validating required fields once loaded.
pub fn load_instance_config(instance_dir: &Path) -> Result<InstanceConfig, ConfigError> {
    let path = instance_config_path(instance_dir);
    let config = if !path.exists() {
        info!(path = %path.display(), "no instance config file found, using defaults");
        InstanceConfig::default()
    } else {
        debug!(path = %path.display(), "loading instance config");
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let mut raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson { path: path.clone(), source })?;
        migrate_instance_config(&mut raw);
        serde_json::from_value(raw).map_err(|source| ConfigError::ParseJson { path: path.clone(), source })?
    };
    let config = apply_instance_env_overrides(config);
    config.validate()?;
    Ok(config)
}

/// Save an instance config to disk (pretty-printed camelCase JSON).
pub fn save_instance_config(config: &InstanceConfig, instance_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(instance_dir)?;
    let path = instance_config_path(instance_dir);
    let json = serde_json::to_string_pretty(config).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, json)?;
    debug!(path = %path.display(), "instance config saved");
    Ok(())
}

/// Old configs wrote `tools.blockList`/`tools.allowList`; the current schema
/// calls them `disallowed`/`allowed`. Rewrite the raw JSON value before
/// typed deserialization, and never clobber a value the new key already
/// set explicitly.
fn migrate_instance_config(raw: &mut serde_json::Value) {
    let Some(tools) = raw.get_mut("tools") else { return };
    if let Some(block_list) = tools.get("blockList").cloned() {
        if tools.get("disallowed").is_none() {
            tools["disallowed"] = block_list;
            debug!("migrated tools.blockList -> tools.disallowed");
        }
    }
    if let Some(allow_list) = tools.get("allowList").cloned() {
        if tools.get("allowed").is_none() {
            tools["allowed"] = allow_list;
            debug!("migrated tools.allowList -> tools.allowed");
        }
    }
}

/// `RELAY_<SECTION>__<FIELD>` env overrides.
fn apply_instance_env_overrides(mut config: InstanceConfig) -> InstanceConfig {
    if let Ok(val) = std::env::var("RELAY_AGENT__NAME") {
        config.agent.name = val;
    }
    if let Ok(val) = std::env::var("RELAY_MODEL") {
        config.model = val;
    }
    if let Ok(val) = std::env::var("RELAY_ADVANCED__MAX_TURNS") {
        if let Ok(n) = val.parse::<u32>() {
            config.advanced.max_turns = n;
        }
    }
    if let Ok(val) = std::env::var("RELAY_SESSION_RECORDING__ENABLED") {
        config.session_recording.enabled = val == "true" || val == "1";
    }
    if let Ok(val) = std::env::var("RELAY_SESSION_RECORDING__RETENTION_DAYS") {
        if let Ok(n) = val.parse::<u32>() {
            config.session_recording.retention_days = n;
        }
    }
    config
}

/// Load `streaming.yaml`, falling back to defaults when absent.
pub fn load_streaming_config(project_root: &Path) -> Result<StreamingConfig, ConfigError> {
    let path = streaming_config_path(project_root);
    let config = if !path.exists() {
        info!(path = %path.display(), "no streaming.yaml found, using defaults");
        StreamingConfig::default()
    } else {
        debug!(path = %path.display(), "loading streaming config");
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.clone(), source })?
    };
    Ok(apply_streaming_env_overrides(config))
}

/// `ORCHESTRATOR_<SECTION>__<FIELD>` env overrides.
fn apply_streaming_env_overrides(mut config: StreamingConfig) -> StreamingConfig {
    if let Ok(val) = std::env::var("ORCHESTRATOR_REDIS__URL") {
        config.redis.url = val;
    }
    if let Ok(val) = std::env::var("ORCHESTRATOR_REDIS__DB") {
        if let Ok(n) = val.parse::<u32>() {
            config.redis.db = n;
        }
    }
    if let Ok(val) = std::env::var("ORCHESTRATOR_REDIS__MAX_CONNECTIONS") {
        if let Ok(n) = val.parse::<u32>() {
            config.redis.max_connections = n;
        }
    }
    if let Ok(val) = std::env::var("ORCHESTRATOR_ASYNC_WRITE__BATCH_SIZE") {
        if let Ok(n) = val.parse::<usize>() {
            config.async_write.batch_size = n;
        }
    }
    if let Ok(val) = std::env::var("ORCHESTRATOR_ASYNC_WRITE__FLUSH_INTERVAL") {
        if let Ok(n) = val.parse::<f64>() {
            config.async_write.flush_interval_secs = n;
        }
    }
    config
}
