//! Error types for the coordination engine.
//!
//! Every failure that crosses the RPC boundary carries a stable wire code
//! (see [`Error::code`]) so callers can branch without parsing prose.

use strum_macros::AsRefStr;
use thiserror::Error;

/// The error type for engine operations.
#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Index error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Git repository error.
    #[error("Archive error: {0}")]
    Git2(#[from] git2::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -- Domain errors with stable wire codes
    /// Operation addressed a project slug or human key that does not exist.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Sender or target agent is not registered in the project.
    #[error("Agent not registered: {0}")]
    AgentNotRegistered(String),

    /// Message lookup failed.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The recipient's contact policy rejected the send.
    /// Contains the names that caused the rejection.
    #[error("Send rejected by contact policy of: {}", blocked.join(", "))]
    PolicyBlocked { blocked: Vec<String> },

    /// An `auto`-policy recipient had no qualifying signal; a contact
    /// request was auto-created and the caller should retry after approval.
    #[error("Contact pending with: {}", pending.join(", "))]
    ContactPending { pending: Vec<String> },

    /// Cross-project send without an accepted agent link; a pending link
    /// was created.
    #[error("Agent link required to reach: {0}")]
    LinkRequired(String),

    /// Malformed input: empty recipient list, bad importance value,
    /// absolute lease path, and friends.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller's deadline elapsed before the project critical section
    /// could be entered. Nothing was mutated.
    #[error("Timed out waiting for project lock on {slug} (held by PID {owner_pid})")]
    Timeout { slug: String, owner_pid: u32 },

    /// An archive commit landed but the index write failed; the recovery
    /// pass repairs the index on the next engine start or `rebuild-index`.
    #[error("Index/archive mismatch: {0}")]
    IndexArchiveMismatch(String),
}

impl Error {
    /// Stable machine-readable code surfaced to RPC callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::AgentNotRegistered(_) => "AGENT_NOT_REGISTERED",
            Self::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            Self::PolicyBlocked { .. } => "POLICY_BLOCKED",
            Self::ContactPending { .. } => "CONTACT_PENDING",
            Self::LinkRequired(_) => "LINK_REQUIRED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::IndexArchiveMismatch(_) => "INDEX_ARCHIVE_MISMATCH",
            Self::Libsql(_) | Self::Git2(_) | Self::SerdeJson(_) | Self::Io(_) => "INTERNAL",
        }
    }

    /// Whether the caller can retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::IndexArchiveMismatch(_))
    }
}

/// A specialized [`Result`] for engine operations.
pub type Result<T> = core::result::Result<T, Error>;
