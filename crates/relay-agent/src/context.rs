//! Context builder — constructs the system prompt and conversation message
//! list for one agent turn.
//!
//! The system prompt is assembled from the instance's identity (name,
//! description) and its optional `system_prompt_file`; prior turns are
//! replayed from recorded session envelopes rather than an ephemeral
//! in-process history, so a resumed session sees exactly what was persisted.

use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use relay_core::chat::{Message, ToolCall};
use relay_core::config::InstanceConfig;
use relay_core::message::{Block, Envelope, MessageType};

// ─────────────────────────────────────────────
// Context builder
// ─────────────────────────────────────────────

/// Builds system prompts and conversation message lists for an agent turn.
pub struct ContextBuilder {
    instance_path: PathBuf,
    agent_name: String,
    agent_description: String,
    system_prompt: Option<String>,
}

impl ContextBuilder {
    /// Create a context builder for an instance rooted at `instance_path`.
    ///
    /// Reads `config.system_prompt_file` (resolved against `instance_path`)
    /// once at construction time; a missing or unreadable file is logged and
    /// silently skipped rather than failing the turn.
    pub fn new(instance_path: impl Into<PathBuf>, config: &InstanceConfig) -> Self {
        let instance_path = instance_path.into();
        let system_prompt = config.system_prompt_file.as_ref().and_then(|rel| {
            let path = instance_path.join(rel);
            match std::fs::read_to_string(&path) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read system_prompt_file");
                    None
                }
            }
        });

        Self {
            instance_path,
            agent_name: config.agent.name.clone(),
            agent_description: config.agent.description.clone(),
            system_prompt,
        }
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt: identity block, then the instance's
    /// custom system prompt file if one was configured.
    pub fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.build_identity()];
        if let Some(prompt) = &self.system_prompt {
            parts.push(prompt.clone());
        }
        parts.join("\n\n---\n\n")
    }

    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let instance_dir = self.instance_path.display();

        let description = if self.agent_description.is_empty() {
            String::new()
        } else {
            format!(" {}", self.agent_description)
        };

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant.{description}\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Instance directory**: `{instance_dir}`\n\n\
             Use your tools when they help answer the request; prefer acting over guessing.",
            name = self.agent_name,
        )
    }

    // ────────────── Message building ──────────────

    /// Build the full message list for an LLM call: system prompt, prior
    /// turns (already converted from recorded envelopes), then the new
    /// user prompt.
    pub fn build_messages(&self, history: &[Message], user_text: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system_prompt()));
        messages.extend_from_slice(history);
        messages.push(Message::user(user_text));
        messages
    }

    /// Add a tool result to the message list (convenience wrapper).
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, result: &str) {
        messages.push(Message::tool_result(tool_call_id, result));
    }

    /// Add an assistant message (with optional tool calls) to the message list.
    pub fn add_assistant_message(messages: &mut Vec<Message>, content: Option<String>, tool_calls: Vec<ToolCall>) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(tool_calls));
        }
    }

    /// Replay a resumed session's recorded envelopes into chat-wire messages.
    ///
    /// `ResultMessage`/`SystemMessage` envelopes carry no conversational
    /// content and are skipped.
    pub fn history_from_envelopes(envelopes: &[Envelope]) -> Vec<Message> {
        let mut messages = Vec::new();

        for env in envelopes {
            match env.message_type {
                MessageType::UserMessage => {
                    if let Some(content) = env.data.get("content").and_then(|v| v.as_str()) {
                        messages.push(Message::user(content));
                    }
                }
                MessageType::AssistantMessage => {
                    let blocks: Vec<Block> = env
                        .data
                        .get("content")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default();

                    let mut text = String::new();
                    let mut tool_calls = Vec::new();
                    for block in blocks {
                        match block {
                            Block::Text { text: t } => text.push_str(&t),
                            Block::ToolUse { id, name, input } => {
                                tool_calls.push(ToolCall::new(id, name, input.to_string()));
                            }
                            Block::ToolResult { .. } => {}
                        }
                    }

                    if !tool_calls.is_empty() {
                        messages.push(Message::assistant_tool_calls(tool_calls));
                    } else if !text.is_empty() {
                        messages.push(Message::assistant(text));
                    }
                }
                MessageType::ToolResultMessage => {
                    if let (Some(id), Some(content)) = (
                        env.data.get("tool_use_id").and_then(|v| v.as_str()),
                        env.data.get("content").and_then(|v| v.as_str()),
                    ) {
                        messages.push(Message::tool_result(id, content));
                    }
                }
                MessageType::ToolUseMessage | MessageType::ResultMessage | MessageType::SystemMessage => {}
            }
        }

        messages
    }
}
