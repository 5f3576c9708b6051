//! Relay Agent — tools, context building, and the `AgentRuntime` turn loop.
//!
//! This crate contains:
//! - **tools**: `Tool` trait, registry, built-in tools (filesystem, shell, web), and the
//!   sub-instance adapter that makes another configured instance callable as a tool
//! - **context**: system prompt and message-list construction, including replaying a
//!   resumed session's recorded envelopes back into chat messages
//! - **runtime**: `AgentRuntime`, which drives one agent turn from prompt to recorded,
//!   finalized session

pub mod context;
pub mod runtime;
pub mod tools;

pub use context::ContextBuilder;
pub use runtime::{AgentRuntime, QueryTextOutcome, RuntimeError};
pub use tools::{Tool, ToolRegistry};
