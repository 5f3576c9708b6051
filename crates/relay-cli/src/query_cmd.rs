//! `orchestrator query` — run one agent turn and print its result.

use anyhow::{Context, Result};

use relay_agent::AgentRuntime;
use relay_core::utils::default_instances_root;

use crate::helpers;

pub async fn run(instance: &str, prompt: &str, resume: Option<String>, parent: Option<String>) -> Result<()> {
    let instance_path = default_instances_root().join(instance);
    let runtime = AgentRuntime::initialize(instance_path)
        .await
        .with_context(|| format!("failed to initialize instance '{instance}'"))?;

    let outcome = runtime
        .query_text(prompt, true, resume.as_deref(), parent.as_deref())
        .await
        .context("agent turn failed")?;

    helpers::print_result(&outcome.result_text, &outcome.session_id);
    runtime.cleanup().await;
    Ok(())
}
