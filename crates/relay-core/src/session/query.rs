//! [`SessionQuery`] — the unified read API plus live subscription with
//! automatic child discovery.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::bus::{messages_channel, system_channel, SharedBus};
use crate::error::SessionError;
use crate::message::{Envelope, MessageType};

use super::fs;
use super::manager::{scan_sessions, SessionSummary};
use super::metadata::{SessionMetadata, SessionStatus, SubsessionLink};

#[derive(Clone, Debug, Serialize)]
pub struct SessionDetails {
    pub metadata: SessionMetadata,
    pub statistics: Option<super::metadata::Statistics>,
    pub messages: Option<Vec<Envelope>>,
    pub subsessions: Vec<SubsessionLink>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Jsonl,
    Text,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct StatisticsSummary {
    pub total_sessions: u64,
    pub completed: u64,
    pub failed: u64,
    pub interrupted: u64,
    pub running: u64,
    pub total_cost_usd: f64,
    pub average_duration_ms: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TreeNode {
    pub session_id: String,
    pub instance_name: String,
    pub depth: u32,
    pub metadata: SessionMetadata,
    pub children: Vec<TreeNode>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlatNode {
    pub session_id: String,
    pub instance_name: String,
    pub depth: u32,
}

/// Flatten a tree into pre-order `(session_id, depth)` pairs.
pub fn flatten_tree(tree: &TreeNode) -> Vec<FlatNode> {
    let mut out = Vec::new();
    flatten_into(tree, &mut out);
    out
}

fn flatten_into(node: &TreeNode, out: &mut Vec<FlatNode>) {
    out.push(FlatNode {
        session_id: node.session_id.clone(),
        instance_name: node.instance_name.clone(),
        depth: node.depth,
    });
    for child in &node.children {
        flatten_into(child, out);
    }
}

pub struct SessionQuery {
    instances_root: PathBuf,
    bus: Option<SharedBus>,
}

impl SessionQuery {
    pub fn new(instances_root: PathBuf, bus: Option<SharedBus>) -> Self {
        SessionQuery { instances_root, bus }
    }

    fn dir(&self, instance_name: &str, session_id: &str) -> PathBuf {
        fs::session_dir(&self.instances_root, instance_name, session_id)
    }

    /// `GetSessionDetails`.
    pub fn get_session_details(
        &self,
        instance_name: &str,
        session_id: &str,
        include_messages: bool,
        message_limit: Option<usize>,
    ) -> Result<SessionDetails, SessionError> {
        let dir = self.dir(instance_name, session_id);
        let metadata = fs::read_metadata(&dir, session_id)?;
        let statistics = fs::read_statistics(&dir);
        let subsessions = statistics.clone().map(|s| s.subsessions).unwrap_or_default();
        let messages = if include_messages {
            let mut msgs = fs::read_messages(&dir, session_id)?;
            if let Some(limit) = message_limit {
                if msgs.len() > limit {
                    msgs = msgs.split_off(msgs.len() - limit);
                }
            }
            Some(msgs)
        } else {
            None
        };
        Ok(SessionDetails { metadata, statistics, messages, subsessions })
    }

    /// `GetSessionMessages`.
    pub fn get_session_messages(
        &self,
        instance_name: &str,
        session_id: &str,
        types: Option<&[MessageType]>,
        limit: Option<usize>,
    ) -> Result<Vec<Envelope>, SessionError> {
        let dir = self.dir(instance_name, session_id);
        let mut msgs = fs::read_messages(&dir, session_id)?;
        if let Some(types) = types {
            msgs.retain(|m| types.contains(&m.message_type));
        }
        if let Some(limit) = limit {
            if msgs.len() > limit {
                msgs = msgs.split_off(msgs.len() - limit);
            }
        }
        Ok(msgs)
    }

    /// `ListSessions` — proxies the same directory scan `SessionManager` uses.
    pub fn list_sessions(
        &self,
        instance_name: &str,
        status: Option<SessionStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<SessionSummary> {
        scan_sessions(&self.instances_root, instance_name, status, limit, offset)
    }

    /// `SearchSessions` — case-insensitive substring match over one field.
    pub fn search_sessions(&self, instance_name: &str, query: &str, field: SearchField, limit: usize) -> Vec<SessionSummary> {
        let needle = query.to_lowercase();
        let root = fs::sessions_root(&self.instances_root, instance_name);
        let mut hits = Vec::new();
        let Ok(entries) = std::fs::read_dir(&root) else {
            return hits;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(session_id) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Ok(meta) = fs::read_metadata(&path, session_id) else { continue };
            let haystack = match field {
                SearchField::InitialPrompt => meta.initial_prompt.clone(),
                SearchField::Result => {
                    let msgs = match fs::read_messages(&path, session_id) {
                        Ok(msgs) => msgs,
                        Err(e) => {
                            warn!(session_id, error = %e, "skipping session with corrupt messages.jsonl during search");
                            continue;
                        }
                    };
                    msgs.into_iter()
                        .rev()
                        .find(|m| m.message_type == MessageType::ResultMessage)
                        .and_then(|m| m.data.get("result").and_then(|v| v.as_str()).map(String::from))
                        .unwrap_or_default()
                }
            };
            if haystack.to_lowercase().contains(&needle) {
                hits.push(meta.into());
                if hits.len() >= limit {
                    break;
                }
            }
        }
        hits
    }

    /// `GetStatisticsSummary` — aggregate counts and cost, optionally limited
    /// to sessions started within the last `recent_days`.
    pub fn get_statistics_summary(&self, instance_name: &str, recent_days: Option<i64>) -> StatisticsSummary {
        let root = fs::sessions_root(&self.instances_root, instance_name);
        let cutoff = recent_days.map(|d| Utc::now() - chrono::Duration::days(d));
        let mut summary = StatisticsSummary::default();
        let mut total_duration_ms: f64 = 0.0;
        let mut duration_samples: u64 = 0;

        let Ok(entries) = std::fs::read_dir(&root) else {
            return summary;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(session_id) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Ok(meta) = fs::read_metadata(&path, session_id) else { continue };
            if let Some(cutoff) = cutoff {
                if meta.start_time < cutoff {
                    continue;
                }
            }
            summary.total_sessions += 1;
            match meta.status {
                SessionStatus::Completed => summary.completed += 1,
                SessionStatus::Failed => summary.failed += 1,
                SessionStatus::Interrupted => summary.interrupted += 1,
                SessionStatus::Running => summary.running += 1,
            }
            if let Some(stats) = fs::read_statistics(&path) {
                summary.total_cost_usd += stats.cost_usd;
                if meta.status.is_terminal() {
                    total_duration_ms += stats.total_duration_ms as f64;
                    duration_samples += 1;
                }
            }
        }
        summary.average_duration_ms = if duration_samples > 0 { total_duration_ms / duration_samples as f64 } else { 0.0 };
        summary
    }

    /// `ExportSession` — write a session to `output_path` in the requested format.
    pub fn export_session(
        &self,
        instance_name: &str,
        session_id: &str,
        output_path: &std::path::Path,
        format: ExportFormat,
        include_messages: bool,
    ) -> Result<(), SessionError> {
        let dir = self.dir(instance_name, session_id);
        let metadata = fs::read_metadata(&dir, session_id)?;
        let statistics = fs::read_statistics(&dir);
        let messages = if include_messages || format == ExportFormat::Jsonl || format == ExportFormat::Text {
            fs::read_messages(&dir, session_id)?
        } else {
            Vec::new()
        };

        let write = |contents: String| -> Result<(), SessionError> {
            std::fs::write(output_path, contents).map_err(|source| SessionError::Write {
                session_id: session_id.to_string(),
                source,
            })
        };

        match format {
            ExportFormat::Json => {
                let body = serde_json::json!({
                    "metadata": metadata,
                    "statistics": statistics,
                    "messages": if include_messages { Some(&messages) } else { None },
                });
                write(serde_json::to_string_pretty(&body).expect("export body always serializes"))
            }
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for m in &messages {
                    out.push_str(&serde_json::to_string(m).expect("Envelope always serializes"));
                    out.push('\n');
                }
                write(out)
            }
            ExportFormat::Text => {
                let mut out = String::new();
                out.push_str(&format!("session {session_id}\nprompt: {}\nstatus: {:?}\n\n", metadata.initial_prompt, metadata.status));
                for m in &messages {
                    out.push_str(&format!("[{}] {}\n", m.message_type.as_str(), m.data));
                }
                write(out)
            }
        }
    }

    /// `BuildSessionTree` — recursively descend `statistics.subsessions`,
    /// resolving each child's own instance. Cycle-safe, `max_depth`-bounded.
    pub fn build_session_tree(
        &self,
        instance_name: &str,
        session_id: &str,
        max_depth: u32,
    ) -> Result<TreeNode, SessionError> {
        let mut visited = HashSet::new();
        self.build_tree_inner(instance_name, session_id, 0, max_depth, &mut visited)
    }

    fn build_tree_inner(
        &self,
        instance_name: &str,
        session_id: &str,
        depth: u32,
        max_depth: u32,
        visited: &mut HashSet<String>,
    ) -> Result<TreeNode, SessionError> {
        let dir = self.dir(instance_name, session_id);
        let metadata = fs::read_metadata(&dir, session_id)?;
        visited.insert(session_id.to_string());

        let mut children = Vec::new();
        if depth < max_depth {
            let subsessions = fs::read_statistics(&dir).map(|s| s.subsessions).unwrap_or_default();
            for link in subsessions {
                if visited.contains(&link.session_id) {
                    continue;
                }
                match self.build_tree_inner(&link.instance_name, &link.session_id, depth + 1, max_depth, visited) {
                    Ok(child) => children.push(child),
                    Err(e) => {
                        warn!(session_id = %link.session_id, error = %e, "skipping unreadable subsession in tree");
                    }
                }
            }
        }

        Ok(TreeNode {
            session_id: session_id.to_string(),
            instance_name: instance_name.to_string(),
            depth,
            metadata,
            children,
        })
    }

    /// `Subscribe` — live parent+children fan-out. See
    /// [`SubscriptionBuilder`] for callback wiring.
    pub fn subscribe(&self, instance_name: &str, session_id: &str) -> SubscriptionBuilder {
        SubscriptionBuilder {
            bus: self.bus.clone(),
            root_instance: instance_name.to_string(),
            root_session: session_id.to_string(),
            on_parent: None,
            on_child: None,
            on_child_started: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum SearchField {
    InitialPrompt,
    Result,
}

pub type MessageHandler = Arc<dyn Fn(Envelope) + Send + Sync>;
pub type ChildMessageHandler = Arc<dyn Fn(String, String, Envelope) + Send + Sync>;
pub type ChildStartedHandler = Arc<dyn Fn(String, String) + Send + Sync>;

pub struct SubscriptionBuilder {
    bus: Option<SharedBus>,
    root_instance: String,
    root_session: String,
    on_parent: Option<MessageHandler>,
    on_child: Option<ChildMessageHandler>,
    on_child_started: Option<ChildStartedHandler>,
}

impl SubscriptionBuilder {
    pub fn on_parent_message(mut self, f: impl Fn(Envelope) + Send + Sync + 'static) -> Self {
        self.on_parent = Some(Arc::new(f));
        self
    }

    pub fn on_child_message(mut self, f: impl Fn(String, String, Envelope) + Send + Sync + 'static) -> Self {
        self.on_child = Some(Arc::new(f));
        self
    }

    pub fn on_child_started(mut self, f: impl Fn(String, String) + Send + Sync + 'static) -> Self {
        self.on_child_started = Some(Arc::new(f));
        self
    }

    /// Start the subscription. Fails immediately if no bus was configured —
    /// live subscription is meaningless without one.
    pub fn start(self) -> Result<Subscription, SessionError> {
        let Some(bus) = self.bus else {
            return Err(SessionError::NotFound(format!(
                "no bus configured; cannot subscribe to {}",
                self.root_session
            )));
        };
        Ok(Subscription::spawn(
            bus,
            self.root_instance,
            self.root_session,
            self.on_parent,
            self.on_child,
            self.on_child_started,
        ))
    }
}

/// A running subscription tree: one task per discovered session, all
/// cancelled together by `Stop`.
pub struct Subscription {
    cancel_tx: watch::Sender<bool>,
    children: Arc<AsyncMutex<HashMap<String, String>>>,
    handles: AsyncMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Subscription {
    fn spawn(
        bus: SharedBus,
        root_instance: String,
        root_session: String,
        on_parent: Option<MessageHandler>,
        on_child: Option<ChildMessageHandler>,
        on_child_started: Option<ChildStartedHandler>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let children = Arc::new(AsyncMutex::new(HashMap::new()));
        let mut handles = Vec::new();

        handles.push(spawn_session_watch(
            bus,
            root_instance,
            root_session,
            cancel_rx,
            children.clone(),
            on_parent,
            on_child,
            on_child_started,
            true,
        ));

        Subscription { cancel_tx, children, handles: AsyncMutex::new(handles) }
    }

    /// `GetChildSessions` — snapshot of discovered `child_session_id → instance_name`.
    pub async fn child_sessions(&self) -> HashMap<String, String> {
        self.children.lock().await.clone()
    }

    /// Idempotent: a second call is a no-op.
    pub fn stop(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Block until every spawned task has exited (normally once
    /// `lifecycle:finalized` is observed and `stop` is called).
    pub async fn wait(&self) {
        let mut handles = self.handles.lock().await;
        for h in handles.drain(..) {
            let _ = h.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_session_watch(
    bus: SharedBus,
    instance_name: String,
    session_id: String,
    mut cancel_rx: watch::Receiver<bool>,
    children: Arc<AsyncMutex<HashMap<String, String>>>,
    on_message: Option<MessageHandler>,
    on_child: Option<ChildMessageHandler>,
    on_child_started: Option<ChildStartedHandler>,
    is_root: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut messages_rx = bus.subscribe(&messages_channel(&session_id)).await;
        let mut system_rx = bus.subscribe(&system_channel(&session_id)).await;
        debug!(session_id = %session_id, is_root, "subscription task started");

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        break;
                    }
                }
                msg = messages_rx.recv() => {
                    match msg {
                        Ok(env) => {
                            if is_root {
                                if let Some(f) = &on_message {
                                    f(env);
                                }
                            } else if let Some(f) = &on_child {
                                f(session_id.clone(), instance_name.clone(), env);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                sys = system_rx.recv() => {
                    match sys {
                        Ok(env) => {
                            if env.data.get("subtype").and_then(|v| v.as_str()) == Some("sub_instance_started") {
                                let child_id = env.data.get("session_id").and_then(|v| v.as_str()).map(String::from);
                                let child_instance = env.data.get("instance_name").and_then(|v| v.as_str()).map(String::from);
                                if let (Some(child_id), Some(child_instance)) = (child_id, child_instance) {
                                    children.lock().await.insert(child_id.clone(), child_instance.clone());
                                    if let Some(f) = &on_child_started {
                                        f(child_id.clone(), child_instance.clone());
                                    }
                                    spawn_session_watch(
                                        bus.clone(),
                                        child_instance,
                                        child_id,
                                        cancel_rx.clone(),
                                        children.clone(),
                                        on_message.clone(),
                                        on_child.clone(),
                                        on_child_started.clone(),
                                        false,
                                    );
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        debug!(session_id = %session_id, "subscription task exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::session::manager::SessionManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn query(dir: &std::path::Path, bus: Option<SharedBus>) -> SessionQuery {
        SessionQuery::new(dir.to_path_buf(), bus)
    }

    #[tokio::test]
    async fn get_session_details_includes_messages_when_requested() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
        session.record_message(Envelope::user("hello")).await.unwrap();
        session.finalize(None, false).await.unwrap();

        let q = query(dir.path(), None);
        let details = q.get_session_details("demo", &session.session_id, true, None).unwrap();
        assert_eq!(details.messages.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_session_details_not_found_errors() {
        let dir = tempdir().unwrap();
        let q = query(dir.path(), None);
        let err = q.get_session_details("demo", "nope", false, None).unwrap_err();
        assert!(matches!(err, SessionError::Read { .. }));
    }

    #[tokio::test]
    async fn get_session_messages_filters_by_type() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
        session.record_message(Envelope::user("a")).await.unwrap();
        session.record_message(Envelope::system("note", serde_json::json!({}))).await.unwrap();
        session.finalize(None, false).await.unwrap();

        let q = query(dir.path(), None);
        let only_user = q
            .get_session_messages("demo", &session.session_id, Some(&[MessageType::UserMessage]), None)
            .unwrap();
        assert_eq!(only_user.len(), 1);
    }

    #[tokio::test]
    async fn search_sessions_matches_initial_prompt_case_insensitively() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        mgr.create_session("Review the PULL REQUEST", serde_json::json!({}), None).await.unwrap();

        let q = query(dir.path(), None);
        let hits = q.search_sessions("demo", "pull request", SearchField::InitialPrompt, 10);
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn statistics_summary_counts_by_status() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let ok = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        ok.finalize(Some(&sample_result(false)), false).await.unwrap();
        let bad = mgr.create_session("b", serde_json::json!({}), None).await.unwrap();
        bad.finalize(Some(&sample_result(true)), false).await.unwrap();

        let q = query(dir.path(), None);
        let summary = q.get_statistics_summary("demo", None);
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
    }

    fn sample_result(is_error: bool) -> crate::message::ResultData {
        crate::message::ResultData {
            subtype: "result".into(),
            duration_ms: 1,
            duration_api_ms: 1,
            is_error,
            num_turns: 1,
            total_cost_usd: 0.01,
            usage: crate::message::UsageData { input_tokens: 10, output_tokens: 5 },
            result: "done".into(),
        }
    }

    #[tokio::test]
    async fn export_json_round_trips_metadata() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
        session.finalize(None, false).await.unwrap();

        let q = query(dir.path(), None);
        let out_path = dir.path().join("export.json");
        q.export_session("demo", &session.session_id, &out_path, ExportFormat::Json, true).unwrap();
        let content = std::fs::read_to_string(&out_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["metadata"]["session_id"], session.session_id);
    }

    #[tokio::test]
    async fn build_tree_spans_three_levels() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let root = mgr.create_session("root", serde_json::json!({}), None).await.unwrap();
        let child = mgr.create_session("child", serde_json::json!({}), Some(root.session_id.clone())).await.unwrap();
        let grandchild = mgr
            .create_session("grandchild", serde_json::json!({}), Some(child.session_id.clone()))
            .await
            .unwrap();

        child
            .append_subsession_link(SubsessionLink {
                session_id: grandchild.session_id.clone(),
                tool_name: "reviewer".into(),
                tool_use_id: "t2".into(),
                timestamp: Utc::now(),
                instance_name: "demo".into(),
                depth: 2,
            })
            .await;
        grandchild.finalize(None, false).await.unwrap();
        child.finalize(None, false).await.unwrap();

        root.append_subsession_link(SubsessionLink {
            session_id: child.session_id.clone(),
            tool_name: "reviewer".into(),
            tool_use_id: "t1".into(),
            timestamp: Utc::now(),
            instance_name: "demo".into(),
            depth: 1,
        })
        .await;
        root.finalize(None, false).await.unwrap();

        let q = query(dir.path(), None);
        let tree = q.build_session_tree("demo", &root.session_id, 10).unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].depth, 0);
        assert_eq!(flat[1].depth, 1);
        assert_eq!(flat[2].depth, 2);
    }

    #[tokio::test]
    async fn build_tree_truncates_at_max_depth_on_cycle() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", None, 10, std::time::Duration::from_secs(60)).unwrap();
        let a = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        let b = mgr.create_session("b", serde_json::json!({}), Some(a.session_id.clone())).await.unwrap();

        // Force a cycle: a links to b, b links back to a.
        a.append_subsession_link(SubsessionLink {
            session_id: b.session_id.clone(),
            tool_name: "x".into(),
            tool_use_id: "t1".into(),
            timestamp: Utc::now(),
            instance_name: "demo".into(),
            depth: 1,
        })
        .await;
        b.append_subsession_link(SubsessionLink {
            session_id: a.session_id.clone(),
            tool_name: "x".into(),
            tool_use_id: "t2".into(),
            timestamp: Utc::now(),
            instance_name: "demo".into(),
            depth: 0,
        })
        .await;
        a.finalize(None, false).await.unwrap();
        b.finalize(None, false).await.unwrap();

        let q = query(dir.path(), None);
        let tree = q.build_session_tree("demo", &a.session_id, 10).unwrap();
        // The cycle back to `a` is skipped because `a` is already visited.
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].children.is_empty());
    }

    #[tokio::test]
    async fn subscribe_without_bus_errors_immediately() {
        let dir = tempdir().unwrap();
        let q = query(dir.path(), None);
        let err = q.subscribe("demo", "s1").start().unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscribe_receives_parent_messages_in_order() {
        let dir = tempdir().unwrap();
        let bus: SharedBus = Arc::new(MessageBus::new(64));
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", Some(bus.clone()), 10, std::time::Duration::from_secs(60)).unwrap();

        let q = query(dir.path(), Some(bus.clone()));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();

        let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
        let sub = q
            .subscribe("demo", &session.session_id)
            .on_parent_message(move |_env| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .start()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.record_message(Envelope::user("one")).await.unwrap();
        session.record_message(Envelope::user("two")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        sub.stop();
        sub.wait().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribe_discovers_child_and_forwards_its_messages() {
        let dir = tempdir().unwrap();
        let bus: SharedBus = Arc::new(MessageBus::new(64));
        let mgr = SessionManager::new(dir.path().to_path_buf(), "demo", Some(bus.clone()), 10, std::time::Duration::from_secs(60)).unwrap();

        let parent = mgr.create_session("parent", serde_json::json!({}), None).await.unwrap();
        let q = query(dir.path(), Some(bus.clone()));

        let started = Arc::new(AsyncMutex::new(Vec::new()));
        let started2 = started.clone();
        let child_msgs = Arc::new(AtomicUsize::new(0));
        let child_msgs2 = child_msgs.clone();

        let sub = q
            .subscribe("demo", &parent.session_id)
            .on_child_started(move |id, name| {
                let started2 = started2.clone();
                tokio::spawn(async move {
                    started2.lock().await.push((id, name));
                });
            })
            .on_child_message(move |_id, _name, _env| {
                child_msgs2.fetch_add(1, Ordering::SeqCst);
            })
            .start()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let child = mgr
            .create_session("child", serde_json::json!({}), Some(parent.session_id.clone()))
            .await
            .unwrap();
        parent
            .record_message(Envelope::sub_instance_started(&child.session_id, "demo"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        child.record_message(Envelope::user("child says hi")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        sub.stop();
        sub.wait().await;

        assert_eq!(child_msgs.load(Ordering::SeqCst), 1);
        assert_eq!(started.lock().await.len(), 1);
    }
}
