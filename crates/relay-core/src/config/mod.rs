//! Configuration: per-instance `config.json` and the project-wide
//! `streaming.yaml` feeding the bus and writer defaults.
//!
//! # Usage
//! ```no_run
//! use relay_core::config;
//!
//! let cfg = config::load_instance_config(std::path::Path::new("instances/demo")).unwrap();
//! println!("model: {}", cfg.model);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{instance_config_path, load_instance_config, load_streaming_config, save_instance_config, streaming_config_path};
pub use schema::{AdvancedConfig, AgentConfig, InstanceConfig, PermissionMode, SessionRecordingConfig, StreamingConfig, ToolsConfig};
