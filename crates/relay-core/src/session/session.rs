//! [`Session`] — the in-memory handle for one recorded conversation.
//!
//! Created by [`super::manager::SessionManager`], mutated exclusively by the
//! `AgentRuntime` that owns it (`record_message`), finalized by that same
//! runtime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::bus::{lifecycle_channel, messages_channel, system_channel, SharedBus};
use crate::error::SessionError;
use crate::message::{Envelope, MessageType, ResultData};

use super::fs;
use super::metadata::{SessionMetadata, SessionStatus, Statistics, SubsessionLink};
use super::writer::JsonlWriter;

/// In-memory counters kept alongside the durable record so `Finalize` never
/// has to re-scan `messages.jsonl` to produce `statistics.json`.
#[derive(Default, Clone, Debug)]
struct Counters {
    num_messages: u64,
    num_tool_calls: u64,
    cost_usd: f64,
    tokens_in: u64,
    tokens_out: u64,
}

pub struct Session {
    pub session_id: String,
    pub instance_name: String,
    dir: PathBuf,
    /// `None` for a hydrated read-only view of a session this process does
    /// not own (see `SessionManager::get_session`).
    writer: Option<Arc<JsonlWriter>>,
    bus: Option<SharedBus>,
    metadata: AsyncMutex<SessionMetadata>,
    counters: AsyncMutex<Counters>,
    subsessions: AsyncMutex<Vec<SubsessionLink>>,
    start_time: chrono::DateTime<Utc>,
    finalized: AtomicBool,
}

pub struct NewSessionArgs<'a> {
    pub instances_root: &'a Path,
    pub instance_name: &'a str,
    pub session_id: &'a str,
    pub initial_prompt: &'a str,
    pub context: Value,
    pub parent_session_id: Option<String>,
    pub resume_of: Option<String>,
    pub depth: u32,
    pub bus: Option<SharedBus>,
    pub batch_size: usize,
    pub flush_interval: std::time::Duration,
}

impl Session {
    /// `Start()` — create the session directory, write the initial
    /// `metadata.json`, publish `lifecycle:started`.
    pub async fn start(args: NewSessionArgs<'_>) -> Result<Self, SessionError> {
        let dir = fs::session_dir(args.instances_root, args.instance_name, args.session_id);
        if dir.exists() {
            return Err(SessionError::AlreadyExists {
                session_id: args.session_id.to_string(),
                path: dir,
            });
        }
        std::fs::create_dir_all(&dir).map_err(|source| SessionError::Write {
            session_id: args.session_id.to_string(),
            source,
        })?;

        let mut context = args.context;
        if let Some(obj) = context.as_object_mut() {
            obj.insert("_owner_pid".to_string(), Value::from(std::process::id()));
        }

        let start_time = Utc::now();
        let metadata = SessionMetadata {
            session_id: args.session_id.to_string(),
            instance_name: args.instance_name.to_string(),
            start_time,
            end_time: None,
            status: SessionStatus::Running,
            depth: args.depth,
            parent_session_id: args.parent_session_id,
            initial_prompt: args.initial_prompt.to_string(),
            context,
            resume_of: args.resume_of,
        };
        fs::write_metadata(&dir, &metadata)?;

        let writer = JsonlWriter::new(fs::messages_path(&dir), args.batch_size, args.flush_interval)
            .map_err(|source| SessionError::Write {
                session_id: args.session_id.to_string(),
                source,
            })?;

        let session = Session {
            session_id: args.session_id.to_string(),
            instance_name: args.instance_name.to_string(),
            dir,
            writer: Some(Arc::new(writer)),
            bus: args.bus,
            metadata: AsyncMutex::new(metadata),
            counters: AsyncMutex::new(Counters::default()),
            subsessions: AsyncMutex::new(Vec::new()),
            start_time,
            finalized: AtomicBool::new(false),
        };

        if let Some(bus) = &session.bus {
            let _ = bus
                .publish(&lifecycle_channel(&session.session_id), Envelope::system("started", serde_json::json!({})))
                .await;
        }
        info!(session_id = %session.session_id, instance = %session.instance_name, "session started");
        Ok(session)
    }

    /// Reopen an existing session directory for resumption: metadata is
    /// read back in, the writer reopens the file in append mode, and status
    /// is set back to `running`. Prior records are never rewritten,
    /// regardless of the prior terminal status.
    pub async fn resume(
        instances_root: &Path,
        instance_name: &str,
        session_id: &str,
        bus: Option<SharedBus>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) -> Result<Self, SessionError> {
        let dir = fs::session_dir(instances_root, instance_name, session_id);
        let mut metadata = fs::read_metadata(&dir, session_id)?;
        let prior_status = metadata.status;
        metadata.status = SessionStatus::Running;
        metadata.end_time = None;
        fs::write_metadata(&dir, &metadata)?;

        let writer = JsonlWriter::new(fs::messages_path(&dir), batch_size, flush_interval)
            .map_err(|source| SessionError::Write { session_id: session_id.to_string(), source })?;

        let stats = fs::read_statistics(&dir).unwrap_or_default();

        let session = Session {
            session_id: session_id.to_string(),
            instance_name: instance_name.to_string(),
            dir,
            writer: Some(Arc::new(writer)),
            bus,
            metadata: AsyncMutex::new(metadata.clone()),
            counters: AsyncMutex::new(Counters {
                num_messages: stats.num_messages,
                num_tool_calls: stats.num_tool_calls,
                cost_usd: stats.cost_usd,
                tokens_in: stats.tokens_in,
                tokens_out: stats.tokens_out,
            }),
            subsessions: AsyncMutex::new(stats.subsessions),
            start_time: metadata.start_time,
            finalized: AtomicBool::new(false),
        };

        info!(session_id = %session.session_id, ?prior_status, "session resumed");
        if let Some(bus) = &session.bus {
            let _ = bus
                .publish(&lifecycle_channel(&session.session_id), Envelope::system("started", serde_json::json!({"resumed": true})))
                .await;
        }
        Ok(session)
    }

    /// A read-only projection of a session this process does not own: no
    /// writer, no bus. Used by `SessionManager::get_session` when the id is
    /// not in the in-memory registry.
    pub fn hydrate(instances_root: &Path, instance_name: &str, session_id: &str) -> Result<Self, SessionError> {
        let dir = fs::session_dir(instances_root, instance_name, session_id);
        let metadata = fs::read_metadata(&dir, session_id)?;
        let stats = fs::read_statistics(&dir).unwrap_or_default();
        Ok(Session {
            session_id: session_id.to_string(),
            instance_name: instance_name.to_string(),
            dir,
            writer: None,
            bus: None,
            start_time: metadata.start_time,
            subsessions: AsyncMutex::new(stats.subsessions),
            counters: AsyncMutex::new(Counters {
                num_messages: stats.num_messages,
                num_tool_calls: stats.num_tool_calls,
                cost_usd: stats.cost_usd,
                tokens_in: stats.tokens_in,
                tokens_out: stats.tokens_out,
            }),
            metadata: AsyncMutex::new(metadata),
            finalized: AtomicBool::new(true),
        })
    }

    pub fn is_live(&self) -> bool {
        self.writer.is_some()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn depth(&self) -> u32 {
        self.metadata.lock().await.depth
    }

    /// `RecordMessage(msg)` — append to JSONL, publish on the bus, update
    /// in-memory counters. Writer errors are logged, never propagated: the
    /// durable path must not block the agent turn, but in-memory state
    /// stays consistent with what went out on the bus either way.
    pub async fn record_message(&self, envelope: Envelope) -> Result<(), SessionError> {
        let Some(writer) = &self.writer else {
            return Err(SessionError::NotFound(format!("{} is read-only", self.session_id)));
        };

        {
            let mut counters = self.counters.lock().await;
            counters.num_messages += 1;
            if envelope.message_type == MessageType::ToolUseMessage {
                counters.num_tool_calls += 1;
            }
            if envelope.message_type == MessageType::AssistantMessage {
                if let Some(blocks) = envelope.data.get("content").and_then(|c| c.as_array()) {
                    counters.num_tool_calls += blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                        .count() as u64;
                }
            }
            if envelope.message_type == MessageType::ResultMessage {
                if let Ok(result) = serde_json::from_value::<ResultData>(envelope.data.clone()) {
                    counters.cost_usd += result.total_cost_usd;
                    counters.tokens_in += result.usage.input_tokens as u64;
                    counters.tokens_out += result.usage.output_tokens as u64;
                }
            }
        }

        let record = serde_json::to_value(&envelope).expect("Envelope always serializes");
        if let Err(source) = writer.append(&record) {
            warn!(session_id = %self.session_id, error = %source, "jsonl append failed");
            return Err(SessionError::Write { session_id: self.session_id.clone(), source });
        }

        if let Some(bus) = &self.bus {
            let _ = bus.publish(&messages_channel(&self.session_id), envelope.clone()).await;
            let is_sub_instance_started = envelope.message_type == MessageType::SystemMessage
                && envelope.data.get("subtype").and_then(|v| v.as_str()) == Some("sub_instance_started");
            if is_sub_instance_started {
                let _ = bus.publish(&system_channel(&self.session_id), envelope).await;
            }
        }
        Ok(())
    }

    /// `AppendSubsessionLink` — record a child session in this session's
    /// in-memory (and eventually `statistics.json`) subsessions list.
    pub async fn append_subsession_link(&self, link: SubsessionLink) {
        self.subsessions.lock().await.push(link);
    }

    /// `Finalize` — flush the writer, compute duration, write
    /// `statistics.json`, update `metadata.json`, publish
    /// `lifecycle:finalized`. Idempotent: a second call is a no-op.
    pub async fn finalize(&self, result: Option<&ResultData>, interrupted: bool) -> Result<(), SessionError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(writer) = &self.writer {
            if let Err(e) = writer.close().await {
                warn!(session_id = %self.session_id, error = %e, "writer close failed during finalize");
            }
        }

        let end_time = Utc::now();
        let total_duration_ms = (end_time - self.start_time).num_milliseconds().max(0);

        let status = if interrupted {
            SessionStatus::Interrupted
        } else {
            match result {
                Some(r) if r.is_error => SessionStatus::Failed,
                Some(_) => SessionStatus::Completed,
                None => SessionStatus::Failed,
            }
        };

        let counters = self.counters.lock().await.clone();
        let subsessions = self.subsessions.lock().await.clone();
        let stats = Statistics {
            num_messages: counters.num_messages,
            num_tool_calls: counters.num_tool_calls,
            total_duration_ms,
            cost_usd: counters.cost_usd,
            tokens_in: counters.tokens_in,
            tokens_out: counters.tokens_out,
            subsessions,
        };
        fs::write_statistics(&self.dir, &self.session_id, &stats)?;

        {
            let mut metadata = self.metadata.lock().await;
            metadata.end_time = Some(end_time);
            metadata.status = status;
            fs::write_metadata(&self.dir, &metadata)?;
        }

        if let Some(bus) = &self.bus {
            let _ = bus
                .publish(
                    &lifecycle_channel(&self.session_id),
                    Envelope::system("finalized", serde_json::json!({"status": status})),
                )
                .await;
        }
        info!(session_id = %self.session_id, ?status, total_duration_ms, "session finalized");
        Ok(())
    }

    pub async fn metadata_snapshot(&self) -> SessionMetadata {
        self.metadata.lock().await.clone()
    }
}
