//! Typed error families for the runtime's four failure domains.
//!
//! Each kind gets its own enum so callers can match on it directly instead
//! of string-matching a flat error type. `anyhow::Error` is reserved for
//! the outermost boundary (CLI command dispatch) where we just need a
//! formatted message.

use std::path::PathBuf;

/// Configuration failed to load or validate.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse instance config {path}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("instance config missing required field: {0}")]
    MissingField(&'static str),
}

/// A session directory or its files could not be read, written, or found.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {session_id} directory already exists at {path}")]
    AlreadyExists { session_id: String, path: PathBuf },

    #[error("failed to write session record for {session_id}: {source}")]
    Write {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read session record for {session_id}: {source}")]
    Read {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session {session_id} metadata is corrupt: {reason}")]
    CorruptMetadata { session_id: String, reason: String },

    #[error("session {session_id} messages.jsonl is corrupt: {reason}")]
    CorruptMessages { session_id: String, reason: String },
}

/// The pub/sub bus could not deliver a publish or a subscription failed.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no subscribers on channel {0} (publish dropped)")]
    NoSubscribers(String),

    #[error("channel {0} closed")]
    Closed(String),
}

/// A tool invocation failed. This is data the agent can see, not a crash.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} missing required argument: {arg}")]
    MissingArgument { tool: String, arg: String },

    #[error("tool {tool} failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("sub-instance {0} is not configured")]
    UnknownSubInstance(String),
}
