//! The session envelope — the record shape written to `messages.jsonl` and
//! published on the bus. Every recorded event is `{ message_type, timestamp, data }`;
//! readers must switch on `message_type`, not a generic `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The six recognized envelope kinds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    UserMessage,
    AssistantMessage,
    ToolUseMessage,
    ToolResultMessage,
    ResultMessage,
    SystemMessage,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserMessage => "UserMessage",
            MessageType::AssistantMessage => "AssistantMessage",
            MessageType::ToolUseMessage => "ToolUseMessage",
            MessageType::ToolResultMessage => "ToolResultMessage",
            MessageType::ResultMessage => "ResultMessage",
            MessageType::SystemMessage => "SystemMessage",
        }
    }
}

/// One recorded or published event. `data` is free-form per `message_type`
/// (see the constructors below for the shapes this crate produces).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Envelope {
    pub fn new(message_type: MessageType, data: Value) -> Self {
        Envelope {
            message_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Envelope::new(
            MessageType::UserMessage,
            serde_json::json!({ "role": "user", "content": content.into() }),
        )
    }

    pub fn assistant(model: impl Into<String>, blocks: Vec<Block>) -> Self {
        Envelope::new(
            MessageType::AssistantMessage,
            serde_json::json!({ "model": model.into(), "content": blocks }),
        )
    }

    pub fn result(result: ResultData) -> Self {
        Envelope::new(MessageType::ResultMessage, serde_json::to_value(result).unwrap())
    }

    pub fn system(subtype: impl Into<String>, fields: Value) -> Self {
        let mut data = serde_json::json!({ "subtype": subtype.into() });
        if let (Some(obj), Some(extra)) = (data.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        Envelope::new(MessageType::SystemMessage, data)
    }

    /// The `sub_instance_started` system event, the one subtype the runtime relies on.
    pub fn sub_instance_started(child_session_id: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Envelope::system(
            "sub_instance_started",
            serde_json::json!({
                "session_id": child_session_id.into(),
                "instance_name": instance_name.into(),
            }),
        )
    }
}

/// A block within `AssistantMessage.data.content`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Block {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// `ResultMessage.data` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultData {
    pub subtype: String,
    pub duration_ms: i64,
    pub duration_api_ms: i64,
    pub is_error: bool,
    pub num_turns: u32,
    pub total_cost_usd: f64,
    pub usage: UsageData,
    pub result: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct UsageData {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
