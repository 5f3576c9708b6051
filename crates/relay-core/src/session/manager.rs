//! [`SessionManager`] — factory and registry of sessions for one instance.
//!
//! Owns the `{instances_root}/{instance_name}/sessions/` directory layout,
//! the in-memory map of live [`Session`] handles, and the retention/repair
//! housekeeping passes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::bus::SharedBus;
use crate::error::SessionError;

use super::fs;
use super::id::generate_session_id;
use super::metadata::{SessionMetadata, SessionStatus};
use super::session::{NewSessionArgs, Session};

/// Grace period before a `running` session with a dead owner pid is
/// considered crashed.
pub const DEFAULT_REPAIR_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

pub struct SessionManager {
    instances_root: PathBuf,
    instance_name: String,
    bus: Option<SharedBus>,
    batch_size: usize,
    flush_interval: Duration,
    live: RwLock<HashMap<String, Arc<Session>>>,
}

#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub depth: u32,
    pub parent_session_id: Option<String>,
    pub initial_prompt: String,
}

impl From<SessionMetadata> for SessionSummary {
    fn from(m: SessionMetadata) -> Self {
        SessionSummary {
            session_id: m.session_id,
            status: m.status,
            start_time: m.start_time,
            end_time: m.end_time,
            depth: m.depth,
            parent_session_id: m.parent_session_id,
            initial_prompt: m.initial_prompt,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub dry_run: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RepairReport {
    pub repaired: Vec<String>,
}

impl SessionManager {
    pub fn new(
        instances_root: PathBuf,
        instance_name: impl Into<String>,
        bus: Option<SharedBus>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> std::io::Result<Self> {
        let instance_name = instance_name.into();
        std::fs::create_dir_all(fs::sessions_root(&instances_root, &instance_name))?;
        Ok(SessionManager {
            instances_root,
            instance_name,
            bus,
            batch_size,
            flush_interval,
            live: RwLock::new(HashMap::new()),
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// `CreateSession` — allocate an id, compute depth from the parent (0 if
    /// none), start the session, register it in the live map.
    pub async fn create_session(
        &self,
        initial_prompt: &str,
        context: serde_json::Value,
        parent_session_id: Option<String>,
    ) -> Result<Arc<Session>, SessionError> {
        let session_id = generate_session_id();
        let depth = match &parent_session_id {
            Some(pid) => self.lookup_depth_anywhere(pid).await.map(|d| d + 1).unwrap_or(1),
            None => 0,
        };

        let session = Session::start(NewSessionArgs {
            instances_root: &self.instances_root,
            instance_name: &self.instance_name,
            session_id: &session_id,
            initial_prompt,
            context,
            parent_session_id,
            resume_of: None,
            depth,
            bus: self.bus.clone(),
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
        })
        .await?;

        let session = Arc::new(session);
        self.live.write().await.insert(session_id, session.clone());
        Ok(session)
    }

    /// `GetSession` — return the live handle if present, else resume it
    /// into the live map (so a second call returns the same `Arc`).
    pub async fn resume_session(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        if let Some(existing) = self.live.read().await.get(session_id) {
            return Ok(existing.clone());
        }
        let session = Session::resume(
            &self.instances_root,
            &self.instance_name,
            session_id,
            self.bus.clone(),
            self.batch_size,
            self.flush_interval,
        )
        .await?;
        let session = Arc::new(session);
        self.live.write().await.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// A read-only view: the live handle if present, otherwise a hydrated
    /// snapshot straight off disk (never registered in the live map).
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        if let Some(existing) = self.live.read().await.get(session_id) {
            return Some(existing.clone());
        }
        Session::hydrate(&self.instances_root, &self.instance_name, session_id)
            .ok()
            .map(Arc::new)
    }

    /// Remove a finalized session from the live map once its owner is done
    /// with it (the directory and files are untouched).
    pub async fn release(&self, session_id: &str) {
        self.live.write().await.remove(session_id);
    }

    async fn lookup_depth_anywhere(&self, session_id: &str) -> Option<u32> {
        if let Some(s) = self.live.read().await.get(session_id) {
            return Some(s.depth().await);
        }
        let dir = fs::session_dir(&self.instances_root, &self.instance_name, session_id);
        fs::read_metadata(&dir, session_id).ok().map(|m| m.depth)
    }

    /// `ListSessions` — scan the instance's sessions directory, order by id
    /// descending (sortable ids ⇒ creation order), apply filters.
    pub fn list_sessions(&self, status: Option<SessionStatus>, limit: usize, offset: usize) -> Vec<SessionSummary> {
        scan_sessions(&self.instances_root, &self.instance_name, status, limit, offset)
    }

    /// `CleanupOldSessions` — delete session directories older than the
    /// retention cutoff. `dry_run` reports without touching disk.
    pub fn cleanup_old_sessions(&self, retention_days: i64, dry_run: bool) -> CleanupReport {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let root = fs::sessions_root(&self.instances_root, &self.instance_name);
        let mut report = CleanupReport { deleted: Vec::new(), dry_run };
        let Ok(entries) = std::fs::read_dir(&root) else {
            return report;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(session_id) = path.file_name().and_then(|n| n.to_str()).map(String::from) else { continue };
            let Ok(meta) = fs::read_metadata(&path, &session_id) else { continue };
            if meta.start_time >= cutoff {
                continue;
            }
            if !dry_run {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(session_id, error = %e, "failed to remove session during cleanup");
                    continue;
                }
            }
            report.deleted.push(session_id);
        }
        report
    }

    /// Crash-repair pass, run once at `AgentRuntime::initialize()`: any
    /// session left `running` whose owner pid is dead and whose last JSONL
    /// record predates the grace period is flipped to `interrupted`.
    pub fn repair_interrupted(&self, grace_period: Duration) -> RepairReport {
        let root = fs::sessions_root(&self.instances_root, &self.instance_name);
        let mut report = RepairReport::default();
        let Ok(entries) = std::fs::read_dir(&root) else {
            return report;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(session_id) = path.file_name().and_then(|n| n.to_str()).map(String::from) else { continue };
            let Ok(mut meta) = fs::read_metadata(&path, &session_id) else { continue };
            if meta.status != SessionStatus::Running {
                continue;
            }
            let owner_pid = meta.context.get("_owner_pid").and_then(|v| v.as_u64());
            let owner_dead = owner_pid.map(|pid| !pid_alive(pid as u32)).unwrap_or(true);
            if !owner_dead {
                continue;
            }
            let last_seen = match fs::last_message(&path, &session_id) {
                Ok(Some(m)) => m.timestamp,
                Ok(None) => meta.start_time,
                Err(e) => {
                    warn!(session_id, error = %e, "corrupt messages.jsonl; falling back to start_time for repair heuristic");
                    meta.start_time
                }
            };
            let stale = Utc::now().signed_duration_since(last_seen) > chrono::Duration::from_std(grace_period).unwrap();
            if !stale {
                continue;
            }
            meta.status = SessionStatus::Interrupted;
            meta.end_time = Some(meta.end_time.unwrap_or(last_seen));
            if fs::write_metadata(&path, &meta).is_ok() {
                info!(session_id, "repaired crashed session to interrupted");
                report.repaired.push(session_id);
            }
        }
        report
    }
}

/// Directory scan shared by [`SessionManager::list_sessions`] and
/// [`super::query::SessionQuery`], which needs the same listing for
/// instances it does not itself own a manager for.
pub fn scan_sessions(
    instances_root: &std::path::Path,
    instance_name: &str,
    status: Option<SessionStatus>,
    limit: usize,
    offset: usize,
) -> Vec<SessionSummary> {
    let root = fs::sessions_root(instances_root, instance_name);
    let mut summaries: Vec<SessionSummary> = Vec::new();
    let Ok(entries) = std::fs::read_dir(&root) else {
        return summaries;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(session_id) = path.file_name().and_then(|n| n.to_str()) else { continue };
        let Ok(meta) = fs::read_metadata(&path, session_id) else { continue };
        if let Some(want) = status {
            if meta.status != want {
                continue;
            }
        }
        summaries.push(meta.into());
    }
    summaries.sort_by(|a, b| b.session_id.cmp(&a.session_id));
    summaries.into_iter().skip(offset).take(limit).collect()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    pid == std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> SessionManager {
        SessionManager::new(dir.to_path_buf(), "demo", None, 10, Duration::from_secs(60)).unwrap()
    }

    #[tokio::test]
    async fn create_session_allocates_root_depth_zero() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("hello", serde_json::json!({}), None).await.unwrap();
        assert_eq!(session.depth().await, 0);
    }

    #[tokio::test]
    async fn create_child_session_inherits_depth_plus_one() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let parent = mgr.create_session("root", serde_json::json!({}), None).await.unwrap();
        parent.finalize(None, false).await.unwrap();
        let child = mgr
            .create_session("child", serde_json::json!({}), Some(parent.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(child.depth().await, 1);
    }

    #[tokio::test]
    async fn get_session_returns_live_handle() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
        let fetched = mgr.get_session(&session.session_id).await.unwrap();
        assert!(fetched.is_live());
    }

    #[tokio::test]
    async fn get_session_hydrates_from_disk_when_not_live() {
        let dir = tempdir().unwrap();
        let id;
        {
            let mgr = manager(dir.path());
            let session = mgr.create_session("hi", serde_json::json!({}), None).await.unwrap();
            id = session.session_id.clone();
            session.finalize(None, false).await.unwrap();
        }
        let mgr2 = manager(dir.path());
        let fetched = mgr2.get_session(&id).await.unwrap();
        assert!(!fetched.is_live());
    }

    #[tokio::test]
    async fn list_sessions_offset_past_total_is_empty() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        let results = mgr.list_sessions(None, 10, 100);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn list_sessions_sorted_descending_by_id() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let a = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = mgr.create_session("b", serde_json::json!({}), None).await.unwrap();
        let results = mgr.list_sessions(None, 10, 0);
        assert_eq!(results[0].session_id, b.session_id);
        assert_eq!(results[1].session_id, a.session_id);
    }

    #[tokio::test]
    async fn list_sessions_filters_by_status() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let running = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        let done = mgr.create_session("b", serde_json::json!({}), None).await.unwrap();
        done.finalize(None, false).await.unwrap();
        let _ = running;

        let failed = mgr.list_sessions(Some(SessionStatus::Failed), 10, 0);
        assert_eq!(failed.len(), 1);
        let running_only = mgr.list_sessions(Some(SessionStatus::Running), 10, 0);
        assert_eq!(running_only.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_dry_run_does_not_delete() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        session.finalize(None, false).await.unwrap();

        let report = mgr.cleanup_old_sessions(-1, true);
        assert_eq!(report.deleted.len(), 1);
        assert!(report.dry_run);
        assert!(mgr.get_session(&session.session_id).await.is_some());
    }

    #[tokio::test]
    async fn cleanup_actually_deletes_when_not_dry_run() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        session.finalize(None, false).await.unwrap();
        let session_dir = session.dir().to_path_buf();

        let report = mgr.cleanup_old_sessions(-1, false);
        assert_eq!(report.deleted.len(), 1);
        assert!(!session_dir.exists());
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_sessions() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        session.finalize(None, false).await.unwrap();
        let report = mgr.cleanup_old_sessions(30, false);
        assert!(report.deleted.is_empty());
    }

    #[tokio::test]
    async fn repair_flags_dead_owner_stale_session_as_interrupted() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        let session_id = session.session_id.clone();
        // Simulate a crash: force the owner pid to something dead and backdate the metadata.
        let session_dir = session.dir().to_path_buf();
        let mut meta = fs::read_metadata(&session_dir, &session_id).unwrap();
        meta.context = serde_json::json!({"_owner_pid": 999_999});
        meta.start_time = Utc::now() - chrono::Duration::hours(1);
        fs::write_metadata(&session_dir, &meta).unwrap();

        let report = mgr.repair_interrupted(Duration::from_secs(1));
        assert!(report.repaired.contains(&session_id));
        let repaired = fs::read_metadata(&session_dir, &session_id).unwrap();
        assert_eq!(repaired.status, SessionStatus::Interrupted);
    }

    #[tokio::test]
    async fn repair_leaves_alive_owner_alone() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr.create_session("a", serde_json::json!({}), None).await.unwrap();
        let report = mgr.repair_interrupted(Duration::from_secs(0));
        assert!(report.repaired.is_empty());
        assert_eq!(session.metadata_snapshot().await.status, SessionStatus::Running);
    }
}
