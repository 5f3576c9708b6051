//! In-process mock provider — no network calls, used by `relay-agent`'s own
//! tests and by anyone exercising `AgentRuntime` without real credentials.
//!
//! Grounded in the ad-hoc `MockProvider`/`MockSubagentProvider` test doubles
//! that used to live inline in `agent_loop.rs` and `subagent.rs`; promoted to
//! a first-class provider so callers outside this crate can reuse it too.

use std::sync::Mutex;

use async_trait::async_trait;

use relay_core::chat::{LlmResponse, Message, ToolDefinition};

use crate::traits::{LlmProvider, LlmRequestConfig};

/// Replays a fixed queue of responses, one per `chat()` call.
///
/// Once the queue is drained, further calls return a canned
/// "no more responses" message rather than panicking — callers that forgot
/// to queue enough turns get a visible but non-fatal sentinel.
pub struct MockProvider {
    responses: Mutex<Vec<LlmResponse>>,
    model: String,
}

impl MockProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            model: "mock".to_string(),
        }
    }

    /// A provider that always answers with a single fixed text response.
    pub fn simple(text: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse {
            content: Some(text.into()),
            ..Default::default()
        }])
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _model: &str,
        _config: &LlmRequestConfig,
    ) -> LlmResponse {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            LlmResponse {
                content: Some("(no more responses)".into()),
                ..Default::default()
            }
        } else {
            responses.remove(0)
        }
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_returns_the_same_text_every_call() {
        let provider = MockProvider::simple("hi");
        let cfg = LlmRequestConfig::default();
        let r1 = provider.chat(&[], None, "mock", &cfg).await;
        assert_eq!(r1.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn queue_drains_in_order() {
        let provider = MockProvider::new(vec![
            LlmResponse {
                content: Some("first".into()),
                ..Default::default()
            },
            LlmResponse {
                content: Some("second".into()),
                ..Default::default()
            },
        ]);
        let cfg = LlmRequestConfig::default();
        let r1 = provider.chat(&[], None, "mock", &cfg).await;
        let r2 = provider.chat(&[], None, "mock", &cfg).await;
        assert_eq!(r1.content.as_deref(), Some("first"));
        assert_eq!(r2.content.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn exhausted_queue_returns_sentinel() {
        let provider = MockProvider::new(vec![]);
        let cfg = LlmRequestConfig::default();
        let r = provider.chat(&[], None, "mock", &cfg).await;
        assert_eq!(r.content.as_deref(), Some("(no more responses)"));
    }
}
