//! Process-local, filesystem-mediated "current session id".
//!
//! A spawned tool subprocess has no direct call path back into the runtime
//! that launched it, so the parent leaves a small file keyed by its own pid
//! before spawning anything; the child looks up its parent pid via the OS
//! and reads that file. A file survives a re-exec in a way an inherited env
//! var wouldn't.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fs::write_atomic;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ContextFile {
    session_id: String,
    instance_path: String,
}

fn file_path_for(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("claude_session_{pid}"))
}

/// Record the current process's running session so any subprocess it spawns
/// can discover it. Must be called before spawning any tool subprocess that
/// might itself re-enter the runtime.
pub fn set(session_id: &str, instance_path: &std::path::Path) -> std::io::Result<()> {
    let pid = std::process::id();
    let path = file_path_for(pid);
    let payload = ContextFile {
        session_id: session_id.to_string(),
        instance_path: instance_path.to_string_lossy().into_owned(),
    };
    let json = serde_json::to_string(&payload).expect("ContextFile always serializes");
    write_atomic(&path, &json)
}

/// Read the current process's session context, if any.
pub fn get() -> Option<(String, PathBuf)> {
    get_for_pid(std::process::id())
}

/// Read the session context recorded by an arbitrary pid (used by a
/// subprocess that looked up its own parent pid).
pub fn get_for_pid(pid: u32) -> Option<(String, PathBuf)> {
    let path = file_path_for(pid);
    let content = std::fs::read_to_string(&path).ok()?;
    let parsed: ContextFile = serde_json::from_str(&content).ok()?;
    Some((parsed.session_id, PathBuf::from(parsed.instance_path)))
}

/// Clear the current process's session context. A no-op if none is set.
pub fn clear() -> std::io::Result<()> {
    clear_for_pid(std::process::id())
}

pub fn clear_for_pid(pid: u32) -> std::io::Result<()> {
    let path = file_path_for(pid);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove every `claude_session_{pid}` file whose pid no longer exists.
/// Called once at `AgentRuntime::initialize()`.
pub fn cleanup_all() -> std::io::Result<usize> {
    let tmp = std::env::temp_dir();
    let mut removed = 0;
    let entries = match std::fs::read_dir(&tmp) {
        Ok(e) => e,
        Err(_) => return Ok(0),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(pid_str) = name.strip_prefix("claude_session_") else { continue };
        let Ok(pid) = pid_str.parse::<u32>() else { continue };
        if !pid_alive(pid) {
            if std::fs::remove_file(entry.path()).is_ok() {
                debug!(pid, "removed stale session context file");
                removed += 1;
            } else {
                warn!(pid, "failed to remove stale session context file");
            }
        }
    }
    Ok(removed)
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    // Best-effort elsewhere: assume alive rather than risk deleting a live
    // process's file; cleanup_all is a hygiene pass, not a correctness one.
    pid == std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn set_then_get_round_trips() {
        clear().unwrap();
        set("sess-1", std::path::Path::new("/instances/demo")).unwrap();
        let (id, path) = get().unwrap();
        assert_eq!(id, "sess-1");
        assert_eq!(path, PathBuf::from("/instances/demo"));
        clear().unwrap();
    }

    #[test]
    #[serial]
    fn clear_on_already_clear_is_a_noop() {
        clear().unwrap();
        clear().unwrap();
        assert!(get().is_none());
    }

    #[test]
    #[serial]
    fn get_absent_returns_none() {
        clear().unwrap();
        assert!(get().is_none());
    }

    #[test]
    fn cleanup_all_removes_files_for_dead_pids() {
        let dead_pid = 999_999_u32;
        let path = file_path_for(dead_pid);
        std::fs::write(&path, "{\"session_id\":\"x\",\"instance_path\":\"y\"}").unwrap();
        assert!(path.exists());
        cleanup_all().unwrap();
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn cleanup_all_keeps_current_process_file() {
        clear().unwrap();
        set("sess-2", std::path::Path::new("/instances/demo")).unwrap();
        cleanup_all().unwrap();
        assert!(get().is_some());
        clear().unwrap();
    }
}
