//! Session recording, pub/sub bus, and configuration for the relay
//! orchestration runtime.
//!
//! Every conversational turn is recorded to an append-only JSONL log under
//! [`session`] and simultaneously fanned out over the in-process [`bus`], so
//! a caller can both replay history and watch it happen.

pub mod bus;
pub mod chat;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod utils;

pub use bus::{MessageBus, SharedBus};
pub use error::{BusError, ConfigError, SessionError, ToolError};
pub use message::{Block, Envelope, MessageType, ResultData, UsageData};
