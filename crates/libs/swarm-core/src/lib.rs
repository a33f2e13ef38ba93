//! # swarm-core: the coordination engine
//!
//! `swarm-core` implements the durable heart of the swarm-mail server:
//!
//! - **Identity registry**: projects and the agents registered inside them
//! - **Archive**: one git repository per project holding markdown messages,
//!   agent profiles and claim records; the sole durable truth
//! - **Index**: a SQLite mirror (relational + FTS5) of the archive, treated
//!   as a rebuildable cache
//! - **Mailbox**: send/reply/inbox/outbox/search with threading
//! - **Leases**: advisory file-path claims with TTL, renewal and
//!   glob-overlap conflict detection
//! - **Policy**: per-agent contact policies, contact requests and
//!   cross-project agent links
//! - **Engine facade**: the per-project serialization discipline that keeps
//!   archive, index and git history mutually consistent
//!
//! The RPC layer (`swarm-mcp`) and the CLI call into [`Engine`] and the
//! controllers under [`model`]; nothing else touches the stores directly.

pub mod engine;
pub mod error;
pub mod model;
pub mod naming;
pub mod store;
pub mod types;

pub use engine::Engine;
pub use error::{Error, Result};
