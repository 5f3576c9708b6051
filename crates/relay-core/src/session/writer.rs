//! Batched append-only writer for one session's `messages.jsonl`.
//!
//! Mirrors the bus in spirit ([`crate::bus::MessageBus`]): a background
//! task owns the file handle, callers hand it pre-serialized records over a
//! channel, and ordering is exactly call order because the channel is
//! single-producer-per-session (the owning [`crate::session::Session`]).

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue depth above which `Append` logs a warning. Not a hard limit — the
/// queue is unbounded in practice.
const HIGH_WATER_MARK: usize = 5_000;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

enum Cmd {
    Append(String),
    Flush(oneshot::Sender<std::io::Result<()>>),
    Close(oneshot::Sender<std::io::Result<()>>),
}

/// Owns the append-only file for one session.
pub struct JsonlWriter {
    tx: mpsc::UnboundedSender<Cmd>,
    handle: Mutex<Option<JoinHandle<()>>>,
    queued: AtomicUsize,
}

impl JsonlWriter {
    pub fn new(path: PathBuf, batch_size: usize, flush_interval: Duration) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(file, rx, batch_size, flush_interval));
        Ok(JsonlWriter {
            tx,
            handle: Mutex::new(Some(handle)),
            queued: AtomicUsize::new(0),
        })
    }

    /// Append one record. Returns immediately; the record is durable once
    /// the owning task's next flush succeeds (forced by `Flush`/`Close`, or
    /// by batch/interval thresholds).
    pub fn append(&self, record: &serde_json::Value) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let depth = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if depth > HIGH_WATER_MARK {
            warn!(depth, "jsonl writer queue above high-water mark");
        }
        self.tx
            .send(Cmd::Append(line))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer task gone"))
    }

    /// Force a flush and wait for it to complete.
    pub async fn flush(&self) -> std::io::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Cmd::Flush(ack_tx))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer task gone"))?;
        ack_rx.await.unwrap_or(Ok(()))
    }

    /// Final flush + fsync, then stop the background task. Safe to call
    /// more than once — subsequent calls are no-ops.
    pub async fn close(&self) -> std::io::Result<()> {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.take() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Cmd::Close(ack_tx)).is_ok() {
            let result = ack_rx.await.unwrap_or(Ok(()));
            let _ = handle.await;
            result
        } else {
            let _ = handle.await;
            Ok(())
        }
    }

    async fn run(
        mut file: std::fs::File,
        mut rx: mpsc::UnboundedReceiver<Cmd>,
        batch_size: usize,
        flush_interval: Duration,
    ) {
        let mut buffer: Vec<String> = Vec::new();
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(Cmd::Append(line)) => {
                            buffer.push(line);
                            if buffer.len() >= batch_size {
                                let _ = Self::flush_buffer(&mut file, &mut buffer);
                            }
                        }
                        Some(Cmd::Flush(ack)) => {
                            let res = Self::flush_buffer(&mut file, &mut buffer);
                            let _ = ack.send(res);
                        }
                        Some(Cmd::Close(ack)) => {
                            let res = Self::flush_buffer(&mut file, &mut buffer)
                                .and_then(|_| file.sync_all());
                            let _ = ack.send(res);
                            break;
                        }
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        let _ = Self::flush_buffer(&mut file, &mut buffer);
                    }
                }
            }
        }
        debug!("jsonl writer task exiting");
    }

    /// Write every buffered record as one `write_all` call so readers never
    /// observe a record split across two writes, then clear the buffer.
    fn flush_buffer(file: &mut std::fs::File, buffer: &mut Vec<String>) -> std::io::Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let joined: String = buffer.concat();
        file.write_all(joined.as_bytes())?;
        file.flush()?;
        buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_then_close_persists_all_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let writer = JsonlWriter::new(path.clone(), 10, Duration::from_secs(60)).unwrap();
        for i in 0..5 {
            writer.append(&serde_json::json!({"i": i})).unwrap();
        }
        writer.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
    }

    #[tokio::test]
    async fn batch_size_triggers_flush_without_explicit_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let writer = JsonlWriter::new(path.clone(), 3, Duration::from_secs(60)).unwrap();
        for i in 0..3 {
            writer.append(&serde_json::json!({"i": i})).unwrap();
        }
        // Give the background task a moment to process the batch.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn flush_interval_triggers_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let writer = JsonlWriter::new(path.clone(), 100, Duration::from_millis(20)).unwrap();
        writer.append(&serde_json::json!({"i": 1})).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let writer = JsonlWriter::new(path, 10, Duration::from_secs(60)).unwrap();
        writer.append(&serde_json::json!({"i": 1})).unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn records_appear_in_call_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let writer = JsonlWriter::new(path.clone(), 2, Duration::from_secs(60)).unwrap();
        for i in 0..20 {
            writer.append(&serde_json::json!({"i": i})).unwrap();
        }
        writer.close().await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let values: Vec<i64> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["i"].as_i64().unwrap())
            .collect();
        let expected: Vec<i64> = (0..20).collect();
        assert_eq!(values, expected);
    }
}
