//! # Model layer
//!
//! Stateless controllers over the [`Engine`](crate::Engine), one per entity,
//! in the Bmc (backend model controller) shape:
//!
//! | Controller | Responsibility |
//! |-----|-------------|
//! | [`project::ProjectBmc`] | project identity, slugs, archive bootstrap |
//! | [`agent::AgentBmc`] | agent registration, profiles, activity |
//! | [`message::MessageBmc`] | mailbox: send, reply, inbox, outbox, search |
//! | [`claim::ClaimBmc`] | file-path leases with TTL and overlap detection |
//! | [`policy`] | contact policies, contact requests, agent links |
//! | [`summary`] | thread summaries with deterministic fallback |
//! | [`recovery`] | rebuild/reconcile the index from the archive |
//!
//! Mutating methods acquire the project lock through the engine; read-only
//! methods go straight to the index.

pub mod agent;
pub mod claim;
pub mod message;
pub mod policy;
pub mod project;
pub mod recovery;
pub mod summary;
