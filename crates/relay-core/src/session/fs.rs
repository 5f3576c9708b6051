//! Disk layout helpers shared by [`super::session::Session`] (writer side)
//! and [`super::query::SessionQuery`] (reader side): path conventions, and
//! tolerant reads of `metadata.json` / `messages.jsonl` / `statistics.json`.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::message::Envelope;

use super::metadata::{SessionMetadata, Statistics};

/// `{instances_root}/{instance_name}/sessions/{session_id}/`
pub fn session_dir(instances_root: &Path, instance_name: &str, session_id: &str) -> PathBuf {
    instances_root.join(instance_name).join("sessions").join(session_id)
}

/// `{instances_root}/{instance_name}/sessions/`
pub fn sessions_root(instances_root: &Path, instance_name: &str) -> PathBuf {
    instances_root.join(instance_name).join("sessions")
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join("metadata.json")
}

pub fn messages_path(dir: &Path) -> PathBuf {
    dir.join("messages.jsonl")
}

pub fn statistics_path(dir: &Path) -> PathBuf {
    dir.join("statistics.json")
}

/// Write a file atomically: write to `path.tmp` then rename over `path`.
/// Avoids readers ever observing a partially-written metadata/statistics file.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

pub fn read_metadata(dir: &Path, session_id: &str) -> Result<SessionMetadata, SessionError> {
    let path = metadata_path(dir);
    let content = std::fs::read_to_string(&path).map_err(|source| SessionError::Read {
        session_id: session_id.to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| SessionError::CorruptMetadata {
        session_id: session_id.to_string(),
        reason: e.to_string(),
    })
}

pub fn write_metadata(dir: &Path, meta: &SessionMetadata) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(meta).expect("SessionMetadata always serializes");
    write_atomic(&metadata_path(dir), &json).map_err(|source| SessionError::Write {
        session_id: meta.session_id.clone(),
        source,
    })
}

pub fn read_statistics(dir: &Path) -> Option<Statistics> {
    let content = std::fs::read_to_string(statistics_path(dir)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn write_statistics(dir: &Path, session_id: &str, stats: &Statistics) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(stats).expect("Statistics always serializes");
    write_atomic(&statistics_path(dir), &json).map_err(|source| SessionError::Write {
        session_id: session_id.to_string(),
        source,
    })
}

/// Read every complete record from `messages.jsonl`. A truncated final line
/// (the writer caught mid-batch) is silently skipped, never reported as a
/// parse error — readers must tolerate this per the durability invariant.
/// A parse failure on any *earlier* line means the file itself is corrupt,
/// not just mid-write, and is reported as `SessionError::CorruptMessages`.
pub fn read_messages(dir: &Path, session_id: &str) -> Result<Vec<Envelope>, SessionError> {
    let path = messages_path(dir);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Ok(Vec::new()),
    };
    let reader = std::io::BufReader::new(file);
    let mut lines: Vec<String> = Vec::new();
    for line in reader.lines() {
        match line {
            Ok(l) => lines.push(l),
            Err(_) => break,
        }
    }
    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(line) {
            Ok(env) => out.push(env),
            Err(e) => {
                if i + 1 == lines.len() {
                    // Only the last line is allowed to be a partial write.
                    break;
                }
                return Err(SessionError::CorruptMessages {
                    session_id: session_id.to_string(),
                    reason: format!("line {} of messages.jsonl: {e}", i + 1),
                });
            }
        }
    }
    Ok(out)
}

/// The last complete line of `messages.jsonl`, used by the crash-repair pass
/// to estimate how long ago a session went quiet.
pub fn last_message(dir: &Path, session_id: &str) -> Result<Option<Envelope>, SessionError> {
    Ok(read_messages(dir, session_id)?.into_iter().next_back())
}
