// ── Engram Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the salience engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (DB, Provider, Config, Validation…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Read paths that may legitimately find nothing return `Option`/empty
//     collections, never a "not found" error.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Validation errors ──────────────────────────────────────────────────────

/// Why a causal edge (or traversal request) was rejected.
/// Rejections are synchronous and never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A mandatory field was absent or blank.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Relation string is not one of the six known relation types.
    #[error("invalid relation type: {0}")]
    InvalidRelation(String),

    /// Strength outside `[0, 1]` (or not a finite number).
    #[error("strength {0} is outside [0, 1]")]
    StrengthOutOfRange(String),

    /// Source and target resolve to the same memory.
    #[error("self-referential edge: {0} -> {0}")]
    SelfReference(String),

    /// Traversal direction string not recognised.
    #[error("invalid traversal direction: {0}")]
    InvalidDirection(String),
}

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before any write.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An upstream call (embedding, provider validation) exceeded its timeout.
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Provider rejected the credential (401/403).
    #[error("Auth error: {0}")]
    Auth(String),

    /// Embedding provider HTTP or API-level failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Configuration source is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store was never opened or has been closed.
    #[error("Store unavailable")]
    StoreUnavailable,

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    /// True for the timeout variant, which callers surface distinctly.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
