//! On-disk session records: `metadata.json` and `statistics.json` shapes.
//!
//! These are the typed mirror of the on-disk data model — kept in their own
//! module since both [`super::session::Session`] (the writer) and
//! [`super::query`] (the reader) need the exact same shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a session, as recorded in `metadata.json`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// `metadata.json` — written at session start, updated on finalize.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub instance_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub depth: u32,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    pub initial_prompt: String,
    /// Opaque caller-supplied context. The runtime also stashes its own
    /// bookkeeping keys here (prefixed `_`), e.g. `_owner_pid` for the
    /// crash-repair pass — callers should not rely on those surviving.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub resume_of: Option<String>,
}

/// One entry in `statistics.json.subsessions` — a link from a parent session
/// to a child it spawned via a sub-instance tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubsessionLink {
    pub session_id: String,
    pub tool_name: String,
    pub tool_use_id: String,
    pub timestamp: DateTime<Utc>,
    pub instance_name: String,
    pub depth: u32,
}

/// `statistics.json` — written once, on finalize.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub num_messages: u64,
    pub num_tool_calls: u64,
    pub total_duration_ms: i64,
    pub cost_usd: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    #[serde(default)]
    pub subsessions: Vec<SubsessionLink>,
}
