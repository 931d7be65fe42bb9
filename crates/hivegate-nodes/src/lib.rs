//! Remote node protocol.
//!
//! The gateway side ([`NodeManager`]) accepts persistent WebSocket
//! connections from headless hosts ([`NodeHost`]), pairs them through an
//! operator approval flow, and invokes capabilities on them with
//! request/response correlation. The [`ExecRouter`] presents a single
//! "run this command" surface that dispatches locally or to a node.

pub mod approvals;
pub mod exec_router;
pub mod host;
pub mod manager;

pub use approvals::{ApprovalCheck, ExecApprovalManager};
pub use exec_router::{ExecHost, ExecRequest, ExecResult, ExecRouter};
pub use host::NodeHost;
pub use manager::NodeManager;
