//! `orchestrator sessions` — the read/maintenance surface over session
//! history: list, inspect, export, watch, and retire old sessions.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use relay_core::session::{ExportFormat, SessionManager, SessionQuery, SessionStatus};
use relay_core::utils::default_instances_root;

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List sessions for an instance, most recent first
    List {
        instance: String,
        /// Filter by status: running, completed, failed, interrupted
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one session's metadata, statistics, and (optionally) messages
    Show {
        instance: String,
        session_id: String,
        /// Include the full message transcript
        #[arg(long)]
        messages: bool,
    },

    /// Print a session and its sub-instance children as a tree
    Tree {
        instance: String,
        session_id: String,
        #[arg(long, default_value_t = 10)]
        max_depth: u32,
    },

    /// Export a session to a file
    Export {
        instance: String,
        session_id: String,
        #[arg(long)]
        format: String,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Follow a session's transcript as new messages are recorded, including
    /// any sub-instance children it spawns
    Watch { instance: String, session_id: String },

    /// Delete sessions older than a retention window
    Cleanup {
        instance: String,
        #[arg(long)]
        retention_days: i64,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn parse_status(raw: &str) -> Result<SessionStatus> {
    Ok(match raw.to_lowercase().as_str() {
        "running" => SessionStatus::Running,
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "interrupted" => SessionStatus::Interrupted,
        other => bail!("unknown status '{other}' (expected running, completed, failed, or interrupted)"),
    })
}

fn parse_format(raw: &str) -> Result<ExportFormat> {
    Ok(match raw.to_lowercase().as_str() {
        "json" => ExportFormat::Json,
        "jsonl" => ExportFormat::Jsonl,
        "text" => ExportFormat::Text,
        other => bail!("unknown format '{other}' (expected json, jsonl, or text)"),
    })
}

pub async fn dispatch(cmd: SessionsCommand) -> Result<()> {
    let root = default_instances_root();

    match cmd {
        SessionsCommand::List { instance, status, limit } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let query = SessionQuery::new(root, None);
            let sessions = query.list_sessions(&instance, status, limit, 0);
            if sessions.is_empty() {
                println!("{}", "no sessions found".dimmed());
                return Ok(());
            }
            for s in sessions {
                println!(
                    "{}  {:<11}  depth={}  {}",
                    s.session_id.cyan(),
                    format!("{:?}", s.status).to_lowercase(),
                    s.depth,
                    relay_core::utils::truncate_string(&s.initial_prompt, 60).dimmed(),
                );
            }
        }

        SessionsCommand::Show { instance, session_id, messages } => {
            let query = SessionQuery::new(root, None);
            let details = query
                .get_session_details(&instance, &session_id, messages, None)
                .with_context(|| format!("session '{session_id}' not found in instance '{instance}'"))?;

            println!("{} {}", "session:".bold(), details.metadata.session_id);
            println!("  status: {:?}", details.metadata.status);
            println!("  depth: {}", details.metadata.depth);
            if let Some(parent) = &details.metadata.parent_session_id {
                println!("  parent: {parent}");
            }
            println!("  prompt: {}", details.metadata.initial_prompt);
            if let Some(stats) = &details.statistics {
                println!(
                    "  messages={} tool_calls={} cost_usd={:.4} duration_ms={}",
                    stats.num_messages, stats.num_tool_calls, stats.cost_usd, stats.total_duration_ms
                );
            }
            if !details.subsessions.is_empty() {
                println!("  subsessions:");
                for link in &details.subsessions {
                    println!("    {} ({})", link.session_id, link.instance_name);
                }
            }
            if let Some(msgs) = &details.messages {
                println!();
                for m in msgs {
                    println!("[{}] {}", m.message_type.as_str(), m.data);
                }
            }
        }

        SessionsCommand::Tree { instance, session_id, max_depth } => {
            let query = SessionQuery::new(root, None);
            let tree = query
                .build_session_tree(&instance, &session_id, max_depth)
                .with_context(|| format!("session '{session_id}' not found in instance '{instance}'"))?;
            print_tree(&tree);
        }

        SessionsCommand::Export { instance, session_id, format, output } => {
            let format = parse_format(&format)?;
            let query = SessionQuery::new(root, None);
            query
                .export_session(&instance, &session_id, &output, format, true)
                .context("export failed")?;
            println!("exported to {}", output.display());
        }

        SessionsCommand::Watch { instance, session_id } => watch(root, &instance, &session_id).await,

        SessionsCommand::Cleanup { instance, retention_days, dry_run } => {
            let manager = SessionManager::new(root, &instance, None, 10, Duration::from_secs(1))
                .context("failed to open instance's session directory")?;
            let report = manager.cleanup_old_sessions(retention_days, dry_run);
            if report.dry_run {
                println!("{} {} session(s) would be deleted", "dry run:".yellow(), report.deleted.len());
            } else {
                println!("{} {} session(s) deleted", "cleanup:".green(), report.deleted.len());
            }
            for id in &report.deleted {
                println!("  {id}");
            }
        }
    }

    Ok(())
}

fn print_tree(node: &relay_core::session::TreeNode) {
    let indent = "  ".repeat(node.depth as usize);
    println!(
        "{indent}{} [{}] {:?}",
        node.session_id.cyan(),
        node.instance_name,
        node.metadata.status
    );
    for child in &node.children {
        print_tree(child);
    }
}

/// The bus is in-process only, so a separately-invoked `watch` process has no
/// live channel to subscribe to. Poll the durable JSONL log instead, walking
/// into any sub-instance children as they're discovered via `statistics.json`.
async fn watch(root: PathBuf, instance: &str, session_id: &str) -> Result<()> {
    let query = SessionQuery::new(root, None);
    let mut seen_counts: std::collections::HashMap<(String, String), usize> = std::collections::HashMap::new();
    let mut known: HashSet<(String, String)> = HashSet::new();
    known.insert((instance.to_string(), session_id.to_string()));

    println!("{} {instance}/{session_id} (Ctrl+C to stop)", "watching:".bold());

    loop {
        let mut terminal_count = 0;
        let total = known.len();
        for (inst, sid) in known.clone() {
            let msgs = match query.get_session_messages(&inst, &sid, None, None) {
                Ok(msgs) => msgs,
                Err(e) => {
                    eprintln!("{} {inst}/{sid}: {e}", "warning:".yellow());
                    continue;
                }
            };
            let seen = seen_counts.entry((inst.clone(), sid.clone())).or_insert(0);
            for m in &msgs[*seen..] {
                println!("[{inst}/{sid}] [{}] {}", m.message_type.as_str(), m.data);
                if m.message_type == relay_core::message::MessageType::SystemMessage {
                    if let Some("sub_instance_started") = m.data.get("subtype").and_then(|v| v.as_str()) {
                        if let (Some(child_id), Some(child_instance)) = (
                            m.data.get("session_id").and_then(|v| v.as_str()),
                            m.data.get("instance_name").and_then(|v| v.as_str()),
                        ) {
                            known.insert((child_instance.to_string(), child_id.to_string()));
                        }
                    }
                }
            }
            *seen = msgs.len();

            if let Ok(details) = query.get_session_details(&inst, &sid, false, None) {
                if details.metadata.status.is_terminal() {
                    terminal_count += 1;
                }
            }
        }

        if total > 0 && terminal_count == total {
            println!("{}", "all watched sessions reached a terminal state".dimmed());
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(750)) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
