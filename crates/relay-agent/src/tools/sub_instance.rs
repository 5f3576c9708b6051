//! Sub-instance tool — wraps another named instance as a callable tool.
//!
//! One [`SubInstanceTool`] is registered per entry in an instance's
//! `sub_claude_instances` map. Calling it constructs (or reuses) the child
//! `AgentRuntime`, links the two sessions, and returns the child's final
//! text result as the tool output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use relay_core::error::ToolError;
use relay_core::session::{SessionManager, SubsessionLink};

use super::base::{optional_string, require_string, Tool};
use crate::runtime::{AgentRuntime, RuntimeError};

/// Builds and caches child [`AgentRuntime`]s by logical sub-instance name.
///
/// Construction is lazy: the first call for a given name builds the child
/// runtime and reuses it for every later call in the same process.
pub struct SubInstanceFactory {
    instances_root: std::path::PathBuf,
    /// logical_name -> instance directory name, copied from the parent's
    /// `sub_claude_instances` config.
    instance_dirs: HashMap<String, String>,
    cache: AsyncMutex<HashMap<String, Arc<AgentRuntime>>>,
}

impl SubInstanceFactory {
    pub fn new(instances_root: std::path::PathBuf, instance_dirs: HashMap<String, String>) -> Self {
        Self {
            instances_root,
            instance_dirs,
            cache: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Names configured as sub-instances, sorted for determinism.
    pub fn logical_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instance_dirs.keys().cloned().collect();
        names.sort();
        names
    }

    async fn get_or_build(&self, logical_name: &str) -> Result<Arc<AgentRuntime>, RuntimeError> {
        {
            let cache = self.cache.lock().await;
            if let Some(runtime) = cache.get(logical_name) {
                return Ok(Arc::clone(runtime));
            }
        }

        let dir_name = self
            .instance_dirs
            .get(logical_name)
            .ok_or_else(|| ToolError::UnknownSubInstance(logical_name.to_string()))?;
        let instance_path = self.instances_root.join(dir_name);

        info!(sub_instance = logical_name, path = %instance_path.display(), "materializing sub-instance runtime");
        let runtime = Arc::new(AgentRuntime::initialize(instance_path).await?);

        let mut cache = self.cache.lock().await;
        let runtime = cache.entry(logical_name.to_string()).or_insert(runtime).clone();
        Ok(runtime)
    }
}

// ─────────────────────────────────────────────
// SubInstanceTool
// ─────────────────────────────────────────────

/// One callable tool wrapping a single configured sub-instance.
pub struct SubInstanceTool {
    logical_name: String,
    factory: Arc<SubInstanceFactory>,
    /// The calling (parent) instance's own session manager — used to look up
    /// the live parent session and append a [`SubsessionLink`] once the
    /// child's turn completes.
    parent_sessions: Arc<SessionManager>,
}

impl SubInstanceTool {
    pub fn new(logical_name: impl Into<String>, factory: Arc<SubInstanceFactory>, parent_sessions: Arc<SessionManager>) -> Self {
        Self {
            logical_name: logical_name.into(),
            factory,
            parent_sessions,
        }
    }
}

#[async_trait]
impl Tool for SubInstanceTool {
    fn name(&self) -> &str {
        &self.logical_name
    }

    fn description(&self) -> &str {
        "Delegate a task to another configured instance and return its final answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The prompt forwarded to the sub-instance"
                },
                "parent_session_id": {
                    "type": "string",
                    "description": "The calling session's id, linked as the child's parent_session_id"
                },
                "context_files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional file paths the sub-instance should read"
                },
                "output_format": {
                    "type": "string",
                    "enum": ["text", "json", "markdown"],
                    "description": "Formatting hint forwarded to the sub-instance"
                },
                "resume_session_id": {
                    "type": "string",
                    "description": "If set, the sub-instance resumes this session instead of starting a new one"
                },
                "variables": {
                    "type": "object",
                    "description": "Free-form key/value context forwarded to the sub-instance"
                }
            },
            "required": ["task", "parent_session_id"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let task = require_string(&params, "task")?;
        let parent_session_id = require_string(&params, "parent_session_id")?;
        let resume_session_id = optional_string(&params, "resume_session_id");

        let context_files: Vec<String> = params
            .get("context_files")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let output_format = optional_string(&params, "output_format").unwrap_or_else(|| "text".to_string());
        let variables = params.get("variables").cloned().unwrap_or_else(|| json!({}));

        let prompt = build_child_prompt(&task, &context_files, &output_format, &variables);

        let runtime = self.factory.get_or_build(&self.logical_name).await?;

        let outcome = runtime
            .query_text(&prompt, true, resume_session_id.as_deref(), Some(&parent_session_id))
            .await?;

        if let Some(parent_session) = self.parent_sessions.get_session(&parent_session_id).await {
            let tool_use_id = optional_string(&params, "__tool_use_id").unwrap_or_default();
            let depth = parent_session.depth().await + 1;
            parent_session
                .append_subsession_link(SubsessionLink {
                    session_id: outcome.session_id.clone(),
                    tool_name: self.logical_name.clone(),
                    tool_use_id,
                    timestamp: Utc::now(),
                    instance_name: runtime.instance_name().to_string(),
                    depth,
                })
                .await;
        } else {
            warn!(
                parent_session_id = %parent_session_id,
                sub_instance = %self.logical_name,
                "parent session not live locally; subsession link not recorded"
            );
        }

        Ok(outcome.result_text)
    }
}

fn build_child_prompt(task: &str, context_files: &[String], output_format: &str, variables: &Value) -> String {
    let mut prompt = task.to_string();

    if !context_files.is_empty() {
        prompt.push_str("\n\nContext files:\n");
        for f in context_files {
            prompt.push_str(&format!("- {f}\n"));
        }
    }

    if output_format != "text" {
        prompt.push_str(&format!("\n\nRespond in {output_format} format."));
    }

    if let Some(obj) = variables.as_object() {
        if !obj.is_empty() {
            prompt.push_str("\n\nVariables:\n");
            for (k, v) in obj {
                prompt.push_str(&format!("- {k}: {v}\n"));
            }
        }
    }

    prompt
}
