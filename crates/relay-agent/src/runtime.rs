//! `AgentRuntime` — orchestrates one agent turn end to end.
//!
//! Owns the composed tool list, the LLM provider, and this instance's
//! `SessionManager`. `Query`/`QueryText` drive the turn algorithm: resolve
//! or create the session, record every envelope as the turn unfolds, and
//! finalize exactly once when the model produces a final answer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::bus::{system_channel, MessageBus, SharedBus};
use relay_core::config::loader::load_instance_config;
use relay_core::config::InstanceConfig;
use relay_core::error::{ConfigError, SessionError, ToolError};
use relay_core::message::{Envelope, MessageType, ResultData, UsageData};
use relay_core::session::{self, SessionManager};
use relay_providers::{create_provider, registry::providers_from_env, LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::sub_instance::{SubInstanceFactory, SubInstanceTool};
use crate::tools::web::{WebFetchTool, WebSearchTool};
use crate::tools::Tool;

/// Default LLM<->tool iterations per turn before giving up on a final answer.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Per-channel broadcast buffer for the process-wide bus.
const BUS_CAPACITY: usize = 256;

/// JSONL writer batching, matching the base crate's `AsyncWriteConfig` defaults.
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The bus is shared by every `AgentRuntime` in the process so that a child
/// instance's session can publish onto a parent instance's system channel
/// even though the two are constructed independently (see
/// `SubInstanceFactory`). One process, one nervous system.
static PROCESS_BUS: OnceLock<SharedBus> = OnceLock::new();

fn process_bus() -> SharedBus {
    PROCESS_BUS
        .get_or_init(|| Arc::new(MessageBus::new(BUS_CAPACITY)))
        .clone()
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("instance path {0} has no directory name")]
    InvalidInstancePath(PathBuf),
    #[error("failed to construct LLM provider: {0}")]
    Provider(String),
}

/// The result of `QueryText`: the final answer plus the session it was
/// recorded under (freshly created, or the one resumed).
pub struct QueryTextOutcome {
    pub result_text: String,
    pub session_id: String,
}

pub struct AgentRuntime {
    instance_path: PathBuf,
    instance_name: String,
    config: InstanceConfig,
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: Arc<SessionManager>,
    bus: SharedBus,
    max_iterations: usize,
}

impl AgentRuntime {
    /// Load configuration, build the tool list (locals + sub-instances),
    /// and wire up the session manager and LLM provider for one instance
    /// directory. Also runs the process-local repair passes: a crashed
    /// prior session's `SessionContext` files and `status: running`
    /// metadata should not linger once a fresh runtime takes over.
    pub async fn initialize(instance_path: PathBuf) -> Result<Self, RuntimeError> {
        let config = load_instance_config(&instance_path)?;
        let providers = providers_from_env(&config.advanced.env);
        let provider: Arc<dyn LlmProvider> =
            Arc::new(create_provider(&config.model, &providers).map_err(RuntimeError::Provider)?);
        Self::initialize_with_provider(instance_path, provider).await
    }

    /// Same as [`Self::initialize`] but with the LLM provider supplied by the
    /// caller instead of resolved from `config.model` + env credentials —
    /// the seam tests and embedders use to wire in `relay_providers::MockProvider`.
    pub async fn initialize_with_provider(
        instance_path: PathBuf,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, RuntimeError> {
        let instance_name = instance_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RuntimeError::InvalidInstancePath(instance_path.clone()))?
            .to_string();
        let instances_root = instance_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let config = load_instance_config(&instance_path)?;

        let bus = process_bus();

        let sessions = SessionManager::new(
            instances_root.clone(),
            instance_name.clone(),
            Some(bus.clone()),
            DEFAULT_BATCH_SIZE,
            DEFAULT_FLUSH_INTERVAL,
        )
        .map_err(|source| SessionError::Write {
            session_id: "<init>".to_string(),
            source,
        })?;

        match session::context::cleanup_all() {
            Ok(n) if n > 0 => info!(instance = %instance_name, removed = n, "cleaned up stale session-context files"),
            Ok(_) => {}
            Err(e) => warn!(instance = %instance_name, error = %e, "session-context cleanup failed"),
        }

        let repaired = sessions.repair_interrupted(session::DEFAULT_REPAIR_GRACE_PERIOD);
        if !repaired.repaired.is_empty() {
            info!(instance = %instance_name, sessions = ?repaired.repaired, "repaired interrupted sessions");
        }

        if config.session_recording.auto_cleanup {
            let report = sessions.cleanup_old_sessions(config.session_recording.retention_days as i64, false);
            if !report.deleted.is_empty() {
                info!(instance = %instance_name, sessions = ?report.deleted, "auto-cleanup removed expired sessions");
            }
        }

        let sessions = Arc::new(sessions);
        let context = ContextBuilder::new(instance_path.clone(), &config);
        let tools = build_tool_registry(&instance_path, &config, sessions.clone());

        let max_iterations = match config.advanced.max_turns {
            0 => DEFAULT_MAX_ITERATIONS,
            n => n as usize,
        };

        Ok(Self {
            instance_path,
            instance_name,
            config,
            provider,
            tools,
            context,
            sessions,
            bus,
            max_iterations,
        })
    }

    /// Run one turn and return the session id plus an asynchronous sequence
    /// of every envelope recorded along the way (user message, each
    /// assistant/tool-call/tool-result round, and the final result).
    ///
    /// `record_session` only controls whether this call publishes
    /// `sub_instance_started` as a child (i.e. whether `parent_session_id`
    /// is honored) — every turn is always recorded, since a Session with no
    /// durable trail would defeat the point of resuming it later.
    ///
    /// The turn runs to completion before this returns; the receiver is a
    /// convenience for consuming the recorded envelopes in order rather than
    /// re-reading them off `messages.jsonl`, not a live feed interleaved
    /// with an in-flight LLM call — callers that want a feed live across
    /// process boundaries use `SessionQuery::subscribe` against the bus
    /// instead.
    pub async fn query(
        &self,
        prompt: &str,
        record_session: bool,
        resume_session_id: Option<&str>,
        parent_session_id: Option<&str>,
    ) -> Result<(mpsc::UnboundedReceiver<Envelope>, String), RuntimeError> {
        let parent_session_id = parent_session_id.filter(|_| record_session);

        let session = match resume_session_id {
            Some(id) => self.sessions.resume_session(id).await?,
            None => {
                self.sessions
                    .create_session(prompt, serde_json::json!({}), parent_session_id.map(String::from))
                    .await?
            }
        };
        let session_id = session.session_id.clone();

        if let Err(e) = session::context::set(&session.session_id, &self.instance_path) {
            warn!(session_id = %session.session_id, error = %e, "failed to set session context");
        }

        if let Some(parent_id) = parent_session_id {
            let started = Envelope::sub_instance_started(session.session_id.clone(), self.instance_name.clone());
            if let Err(e) = self.bus.publish(&system_channel(parent_id), started).await {
                debug!(parent = parent_id, error = %e, "no subscribers for sub_instance_started");
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = self.run_turn(&session, prompt, Some(&tx)).await;
        drop(tx);

        if let Err(e) = session::context::clear() {
            warn!(session_id = %session.session_id, error = %e, "failed to clear session context");
        }

        outcome.map(|()| (rx, session_id))
    }

    /// Run one turn to completion and return its final text plus the
    /// session it was recorded under. A convenience consumer of [`Self::query`]
    /// that drains the stream for the last `ResultMessage`.
    pub async fn query_text(
        &self,
        prompt: &str,
        record_session: bool,
        resume_session_id: Option<&str>,
        parent_session_id: Option<&str>,
    ) -> Result<QueryTextOutcome, RuntimeError> {
        let (mut stream, session_id) = self.query(prompt, record_session, resume_session_id, parent_session_id).await?;

        let mut result_text = String::new();
        while let Some(envelope) = stream.recv().await {
            if envelope.message_type == MessageType::ResultMessage {
                result_text = envelope
                    .data
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
            }
        }

        Ok(QueryTextOutcome { result_text, session_id })
    }

    /// The LLM<->tool loop for one turn, driving `session.record_message`
    /// for every envelope (and forwarding each to `emit`, if given) and
    /// finalizing on completion or interruption.
    async fn run_turn(
        &self,
        session: &Arc<session::Session>,
        prompt: &str,
        emit: Option<&mpsc::UnboundedSender<Envelope>>,
    ) -> Result<(), RuntimeError> {
        let started_at = std::time::Instant::now();
        let request_config = LlmRequestConfig::default();
        let tool_defs = self.tools.get_definitions();

        let existing = relay_core::session::fs::read_messages(session.dir(), &session.session_id)?;
        let history = ContextBuilder::history_from_envelopes(&existing);
        let mut messages = self.context.build_messages(&history, prompt);

        let user_envelope = Envelope::user(prompt);
        session.record_message(user_envelope.clone()).await?;
        if let Some(tx) = emit {
            let _ = tx.send(user_envelope);
        }

        let mut num_turns: u32 = 0;
        let mut tokens_in: u32 = 0;
        let mut tokens_out: u32 = 0;
        let mut final_text: Option<String> = None;
        let mut interrupted = false;

        for iteration in 0..self.max_iterations {
            num_turns += 1;
            debug!(session_id = %session.session_id, iteration, "LLM call");

            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.config.model, &request_config)
                .await;

            if let Some(usage) = &response.usage {
                tokens_in += usage.prompt_tokens;
                tokens_out += usage.completion_tokens;
            }

            if response.has_tool_calls() {
                let mut blocks = Vec::new();
                if let Some(text) = &response.content {
                    if !text.is_empty() {
                        blocks.push(relay_core::message::Block::Text { text: text.clone() });
                    }
                }
                for tc in &response.tool_calls {
                    let input: serde_json::Value = serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    blocks.push(relay_core::message::Block::ToolUse {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        input,
                    });
                }
                let assistant_envelope = Envelope::assistant(self.config.model.clone(), blocks);
                session.record_message(assistant_envelope.clone()).await?;
                if let Some(tx) = emit {
                    let _ = tx.send(assistant_envelope);
                }

                ContextBuilder::add_assistant_message(&mut messages, response.content.clone(), response.tool_calls.clone());

                for tc in &response.tool_calls {
                    let mut params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    // Carried so SubInstanceTool can attribute the subsession link it
                    // appends to the parent session back to this specific tool call.
                    params.insert("__tool_use_id".to_string(), serde_json::Value::String(tc.id.clone()));

                    info!(session_id = %session.session_id, tool = %tc.function.name, "executing tool call");
                    let (result, is_error) = match self.config.advanced.permission_mode {
                        relay_core::config::PermissionMode::Ask => {
                            warn!(
                                session_id = %session.session_id,
                                tool = %tc.function.name,
                                "tool call denied: permission_mode is \"ask\" and this runtime has no interactive approval channel"
                            );
                            (
                                format!(
                                    "Error: tool '{}' was not executed because advanced.permissionMode is \"ask\" and no approval channel is available; set it to \"auto\" or \"bypassPermissions\" to allow tool execution",
                                    tc.function.name
                                ),
                                true,
                            )
                        }
                        relay_core::config::PermissionMode::Auto | relay_core::config::PermissionMode::BypassPermissions => {
                            self.tools.execute(&tc.function.name, params).await
                        }
                    };

                    let tool_result_envelope = Envelope::new(
                        MessageType::ToolResultMessage,
                        serde_json::json!({
                            "tool_use_id": tc.id,
                            "content": result,
                            "is_error": is_error,
                        }),
                    );
                    session.record_message(tool_result_envelope.clone()).await?;
                    if let Some(tx) = emit {
                        let _ = tx.send(tool_result_envelope);
                    }

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                final_text = response.content;
                break;
            }
        }

        if final_text.is_none() && num_turns >= self.max_iterations as u32 {
            warn!(session_id = %session.session_id, "turn exhausted max iterations without a final answer");
            interrupted = true;
        }

        let result_text =
            final_text.unwrap_or_else(|| "I've completed processing but have no final answer to give.".to_string());

        let result = ResultData {
            subtype: if interrupted { "error_max_turns".to_string() } else { "success".to_string() },
            duration_ms: started_at.elapsed().as_millis() as i64,
            duration_api_ms: started_at.elapsed().as_millis() as i64,
            is_error: interrupted,
            num_turns,
            total_cost_usd: 0.0,
            usage: UsageData {
                input_tokens: tokens_in,
                output_tokens: tokens_out,
            },
            result: result_text.clone(),
        };
        let result_envelope = Envelope::result(result.clone());
        session.record_message(result_envelope.clone()).await?;
        if let Some(tx) = emit {
            let _ = tx.send(result_envelope);
        }
        session.finalize(Some(&result), interrupted).await?;

        Ok(())
    }

    /// Close writers and release this runtime's session-manager resources.
    /// Called when an instance is being torn down (not on every turn).
    pub async fn cleanup(&self) {
        info!(instance = %self.instance_name, "agent runtime cleanup");
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }
}

/// Assemble the tool list for one instance: the built-in local tools,
/// filtered through `tools.allowed`/`tools.disallowed` glob patterns, plus
/// one `SubInstanceTool` per entry in `sub_claude_instances`.
fn build_tool_registry(
    instance_path: &std::path::Path,
    config: &InstanceConfig,
    sessions: Arc<SessionManager>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let workspace = instance_path.to_path_buf();

    let locals: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool::new(Some(workspace.clone()))),
        Arc::new(WriteFileTool::new(Some(workspace.clone()))),
        Arc::new(EditFileTool::new(Some(workspace.clone()))),
        Arc::new(ListDirTool::new(Some(workspace.clone()))),
        Arc::new(ExecTool::new(workspace.clone(), None, true)),
        Arc::new(WebSearchTool::new(config.advanced.env.get("BRAVE_API_KEY").cloned())),
        Arc::new(WebFetchTool::new()),
    ];

    for tool in locals {
        if tool_allowed(tool.name(), config) {
            registry.register(tool);
        }
    }

    if !config.sub_claude_instances.is_empty() {
        let factory = Arc::new(SubInstanceFactory::new(
            instance_path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            config.sub_claude_instances.clone(),
        ));
        for logical_name in factory.logical_names() {
            if tool_allowed(&logical_name, config) {
                registry.register(Arc::new(SubInstanceTool::new(logical_name, factory.clone(), sessions.clone())));
            }
        }
    }

    registry
}

/// `disallowed` wins over `allowed`; an empty `allowed` list means "every
/// tool not explicitly disallowed" rather than "no tools".
fn tool_allowed(name: &str, config: &InstanceConfig) -> bool {
    let matches_any = |patterns: &[String]| {
        patterns
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .any(|p| p.matches(name))
    };

    if matches_any(&config.tools.disallowed) {
        return false;
    }
    if config.tools.allowed.is_empty() {
        return true;
    }
    matches_any(&config.tools.allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config::{AgentConfig, ToolsConfig};

    fn test_config() -> InstanceConfig {
        InstanceConfig {
            agent: AgentConfig {
                name: "TestBot".into(),
                description: String::new(),
            },
            model: "mock".into(),
            ..Default::default()
        }
    }

    #[test]
    fn tool_allowed_defaults_to_permissive() {
        let cfg = test_config();
        assert!(tool_allowed("exec", &cfg));
    }

    #[test]
    fn tool_allowed_honors_disallow_glob() {
        let mut cfg = test_config();
        cfg.tools.disallowed = vec!["exec*".to_string()];
        assert!(!tool_allowed("exec", &cfg));
        assert!(tool_allowed("read_file", &cfg));
    }

    #[test]
    fn tool_allowed_restricts_to_allowlist() {
        let mut cfg = test_config();
        cfg.tools = ToolsConfig {
            allowed: vec!["read_*".to_string()],
            disallowed: vec![],
        };
        assert!(tool_allowed("read_file", &cfg));
        assert!(!tool_allowed("exec", &cfg));
    }

    #[test]
    fn tool_allowed_disallow_wins_over_allow() {
        let mut cfg = test_config();
        cfg.tools = ToolsConfig {
            allowed: vec!["*".to_string()],
            disallowed: vec!["exec".to_string()],
        };
        assert!(!tool_allowed("exec", &cfg));
        assert!(tool_allowed("read_file", &cfg));
    }

    #[tokio::test]
    async fn initialize_fails_on_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({"agent": {"name": ""}, "model": ""}).to_string(),
        )
        .unwrap();
        let result = AgentRuntime::initialize(dir.path().to_path_buf()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn max_turns_zero_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({"agent": {"name": "Bot"}, "model": "mock"}).to_string(),
        )
        .unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::simple("hi"));
        let runtime = AgentRuntime::initialize_with_provider(dir.path().to_path_buf(), provider)
            .await
            .unwrap();
        assert_eq!(runtime.max_iterations, DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn max_turns_config_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({"agent": {"name": "Bot"}, "model": "mock", "advanced": {"maxTurns": 3}}).to_string(),
        )
        .unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::simple("hi"));
        let runtime = AgentRuntime::initialize_with_provider(dir.path().to_path_buf(), provider)
            .await
            .unwrap();
        assert_eq!(runtime.max_iterations, 3);
    }

    #[tokio::test]
    async fn initialize_fails_without_configured_provider() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({"agent": {"name": "Bot"}, "model": "gpt-4o"}).to_string(),
        )
        .unwrap();
        let result = AgentRuntime::initialize(dir.path().to_path_buf()).await;
        assert!(matches!(result, Err(RuntimeError::Provider(_))));
    }

    #[tokio::test]
    async fn default_permission_mode_denies_tool_execution() {
        use relay_core::chat::{LlmResponse, ToolCall};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({"agent": {"name": "Bot"}, "model": "mock"}).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("demo.txt"), "hi").unwrap();

        let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::new(vec![
            LlmResponse {
                tool_calls: vec![ToolCall::new("call_1", "read_file", r#"{"path":"demo.txt"}"#)],
                ..Default::default()
            },
            LlmResponse { content: Some("done".to_string()), ..Default::default() },
        ]));
        let runtime = AgentRuntime::initialize_with_provider(dir.path().to_path_buf(), provider)
            .await
            .unwrap();

        let (mut stream, _session_id) = runtime.query("hello", false, None, None).await.unwrap();
        let mut saw_denied = false;
        while let Some(envelope) = stream.recv().await {
            if envelope.message_type == MessageType::ToolResultMessage
                && envelope.data.get("is_error").and_then(|v| v.as_bool()) == Some(true)
            {
                saw_denied = true;
            }
        }
        assert!(saw_denied, "expected ask mode to deny the tool call");
    }

    #[tokio::test]
    async fn bypass_permissions_allows_tool_execution() {
        use relay_core::chat::{LlmResponse, ToolCall};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::json!({
                "agent": {"name": "Bot"},
                "model": "mock",
                "advanced": {"permissionMode": "bypassPermissions"},
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("demo.txt"), "hi").unwrap();

        let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::new(vec![
            LlmResponse {
                tool_calls: vec![ToolCall::new("call_1", "read_file", r#"{"path":"demo.txt"}"#)],
                ..Default::default()
            },
            LlmResponse { content: Some("done".to_string()), ..Default::default() },
        ]));
        let runtime = AgentRuntime::initialize_with_provider(dir.path().to_path_buf(), provider)
            .await
            .unwrap();

        let (mut stream, _session_id) = runtime.query("hello", false, None, None).await.unwrap();
        let mut saw_success = false;
        while let Some(envelope) = stream.recv().await {
            if envelope.message_type == MessageType::ToolResultMessage
                && envelope.data.get("is_error").and_then(|v| v.as_bool()) == Some(false)
            {
                saw_success = true;
            }
        }
        assert!(saw_success, "expected bypassPermissions to allow the tool call");
    }

    #[tokio::test]
    async fn auto_cleanup_removes_expired_sessions_at_startup() {
        let root = tempfile::tempdir().unwrap();
        let instance_dir = root.path().join("demo");
        std::fs::create_dir_all(&instance_dir).unwrap();
        std::fs::write(
            instance_dir.join("config.json"),
            serde_json::json!({
                "agent": {"name": "Bot"},
                "model": "mock",
                "sessionRecording": {"autoCleanup": true, "retentionDays": 0},
            })
            .to_string(),
        )
        .unwrap();

        {
            let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::simple("hi"));
            let runtime = AgentRuntime::initialize_with_provider(instance_dir.clone(), provider)
                .await
                .unwrap();
            let outcome = runtime.query_text("hello", true, None, None).await.unwrap();
            // Back-date the session so a retention window of 0 days considers it expired.
            let dir = relay_core::session::fs::session_dir(root.path(), "demo", &outcome.session_id);
            let mut meta = relay_core::session::fs::read_metadata(&dir, &outcome.session_id).unwrap();
            meta.start_time = chrono::Utc::now() - chrono::Duration::days(1);
            relay_core::session::fs::write_metadata(&dir, &meta).unwrap();
        }

        let provider: Arc<dyn LlmProvider> = Arc::new(relay_providers::MockProvider::simple("hi"));
        let _runtime = AgentRuntime::initialize_with_provider(instance_dir, provider).await.unwrap();

        let query = relay_core::session::SessionQuery::new(root.path().to_path_buf(), None);
        let sessions = query.list_sessions("demo", None, 50, 0);
        assert!(sessions.is_empty(), "auto_cleanup should have removed the expired session on startup");
    }
}
