//! Configuration schema — `InstanceConfig` (per-instance options) and
//! `StreamingConfig` (global `streaming.yaml`).
//!
//! JSON on disk uses **camelCase** keys; Rust fields stay snake_case via
//! `#[serde(rename_all = "camelCase")]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─────────────────────────────────────────────
// InstanceConfig
// ─────────────────────────────────────────────

/// One instance's configuration — `{instance_dir}/config.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceConfig {
    pub agent: AgentConfig,
    /// LLM model identifier forwarded to the client. Required — validated
    /// in [`InstanceConfig::validate`], not at the type level.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt_file: Option<String>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub sub_claude_instances: HashMap<String, String>,
    #[serde(default)]
    pub session_recording: SessionRecordingConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            model: String::new(),
            system_prompt_file: None,
            tools: ToolsConfig::default(),
            sub_claude_instances: HashMap::new(),
            session_recording: SessionRecordingConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl InstanceConfig {
    /// `agent.name` and `model` are required; everything else tolerates
    /// being absent. Called once after loading — a fully-permissive
    /// `#[serde(default)]` parse is only the first half of validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.name.is_empty() {
            return Err(ConfigError::MissingField("agent.name"));
        }
        if self.model.is_empty() {
            return Err(ConfigError::MissingField("model"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Glob patterns (see the `glob` crate) over tool names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub disallowed: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecordingConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub max_total_size_mb: u64,
    pub auto_cleanup: bool,
    /// `None` means "record all message types" — filtering happens on read,
    /// not at write time.
    #[serde(default)]
    pub message_types: Option<Vec<String>>,
}

impl Default for SessionRecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 30,
            max_total_size_mb: 500,
            auto_cleanup: true,
            message_types: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Ask,
    Auto,
    BypassPermissions,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Ask
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedConfig {
    pub permission_mode: PermissionMode,
    /// `0` means unlimited.
    pub max_turns: u32,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            permission_mode: PermissionMode::default(),
            max_turns: 0,
            env: HashMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// StreamingConfig
// ─────────────────────────────────────────────

/// Global `streaming.yaml` at the project root.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingConfig {
    pub redis: RedisConfig,
    pub async_write: AsyncWriteConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            async_write: AsyncWriteConfig::default(),
        }
    }
}

/// Named for parity with the source system's broker of choice; the bus
/// implementation itself is in-process (see `crate::bus`) — these fields
/// only matter if a future transport actually dials out to one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    pub url: String,
    pub db: u32,
    pub max_connections: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            max_connections: 50,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AsyncWriteConfig {
    pub batch_size: usize,
    pub flush_interval_secs: f64,
}

impl Default for AsyncWriteConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_secs: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_config_defaults_are_permissive_but_invalid() {
        let cfg = InstanceConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn instance_config_validates_once_required_fields_set() {
        let mut cfg = InstanceConfig::default();
        cfg.agent.name = "demo".into();
        cfg.model = "anthropic/claude-sonnet".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn instance_config_partial_json_keeps_defaults() {
        let json = serde_json::json!({
            "agent": { "name": "demo" },
            "model": "gpt-4o",
        });
        let cfg: InstanceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(cfg.agent.name, "demo");
        assert!(cfg.session_recording.enabled);
        assert_eq!(cfg.session_recording.retention_days, 30);
    }

    #[test]
    fn instance_config_camel_case_round_trip() {
        let mut cfg = InstanceConfig::default();
        cfg.agent.name = "demo".into();
        cfg.model = "m".into();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json["sessionRecording"].get("retentionDays").is_some());
        assert!(json["sessionRecording"].get("retention_days").is_none());
    }

    #[test]
    fn streaming_config_defaults() {
        let cfg = StreamingConfig::default();
        assert_eq!(cfg.redis.max_connections, 50);
        assert_eq!(cfg.async_write.batch_size, 10);
    }

    #[test]
    fn permission_mode_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::BypassPermissions).unwrap(),
            "\"bypassPermissions\""
        );
    }
}
