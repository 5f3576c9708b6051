//! Session recording: directory layout, batched durable writes, and the
//! process-local session-context side channel.

pub mod context;
pub mod fs;
pub mod id;
pub mod manager;
pub mod metadata;
pub mod query;
pub mod session;
pub mod writer;

pub use id::generate_session_id;
pub use manager::{CleanupReport, RepairReport, SessionManager, SessionSummary, DEFAULT_REPAIR_GRACE_PERIOD};
pub use metadata::{SessionMetadata, SessionStatus, Statistics, SubsessionLink};
pub use query::{
    flatten_tree, ChildMessageHandler, ChildStartedHandler, ExportFormat, FlatNode, MessageHandler, SearchField,
    SessionDetails, SessionQuery, StatisticsSummary, Subscription, SubscriptionBuilder, TreeNode,
};
pub use session::{NewSessionArgs, Session};
pub use writer::JsonlWriter;
