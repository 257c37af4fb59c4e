//! Client for a human-in-the-loop approval service
//!
//! Agents use [`ApprovalClient`] to ask a human before running a sensitive
//! function, to escalate requests nobody has answered and to read decisions
//! back. [`RequireApproval`] gates any [`ToolFunction`] behind such a request,
//! and [`EventStream`] follows the service's live event feed.

pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod gate;
pub mod retry;
pub mod sse;
pub mod validation;

pub use client::ApprovalClient;
pub use connection::CloudConnection;
pub use error::{ApprovalError, Result};
pub use events::{EventFilter, EventStream, NoHooks, ReconnectPolicy, SubscriptionHooks};
pub use gate::{wrap_with_approval, Approver, ConsoleApprover, RequireApproval, ToolFunction};
pub use retry::{retry_with_backoff, RetryPolicy};

// Re-export the data model so callers need only one dependency
pub use hitl_common;
