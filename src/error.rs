//! Error types for the Griya engine.
//!
//! A single crate-level error enum covers every failure class the engine can
//! surface. Each variant carries a stable `kind()` tag that the HTTP error
//! envelope and the metrics sink use; the tag set is the crate's public
//! error taxonomy and must not change without a corresponding API note.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GriyaError>;

/// All errors produced by the engine.
#[derive(Error, Debug)]
pub enum GriyaError {
    /// The caller supplied an invalid request (bad criteria, empty query on a
    /// semantic-only method, conflicting price constraints, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The Property Backend (or another upstream) answered with a server
    /// error or refused the connection.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An upstream call exceeded its deadline.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Vector store I/O failure. Dimension mismatches also surface here and
    /// must be treated as fatal by callers.
    #[error("vector store error: {0}")]
    VectorIo(String),

    /// The embedding provider failed. Never silently replaced by a
    /// zero-vector.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Both geocoding providers failed or returned nothing usable.
    #[error("geocoding failed: {0}")]
    GeocodeFailed(String),

    /// A stored conversation violated the assistant/tool ordering invariant
    /// in a way that could not be repaired by dropping messages.
    #[error("memory invariant violated: {0}")]
    MemoryInvariant(String),

    /// The agent loop hit its tool-hop ceiling.
    #[error("tool hop limit exhausted after {0} hops")]
    ToolHopExhausted(usize),

    /// A provider rate-limited us and bounded retries were used up.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Configuration is invalid (weights not summing to 1, negative limits,
    /// unparseable TOML, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Anything that does not fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GriyaError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        GriyaError::BadRequest(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        GriyaError::UpstreamUnavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GriyaError::UpstreamTimeout(msg.into())
    }

    pub fn vector_io(msg: impl Into<String>) -> Self {
        GriyaError::VectorIo(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        GriyaError::EmbeddingFailed(msg.into())
    }

    pub fn geocode(msg: impl Into<String>) -> Self {
        GriyaError::GeocodeFailed(msg.into())
    }

    pub fn memory_invariant(msg: impl Into<String>) -> Self {
        GriyaError::MemoryInvariant(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        GriyaError::RateLimited(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        GriyaError::InvalidConfig(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GriyaError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GriyaError::Internal(msg.into())
    }

    /// Stable taxonomy tag for the error envelope and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GriyaError::BadRequest(_) => "bad_request",
            GriyaError::UpstreamUnavailable(_) => "upstream_unavailable",
            GriyaError::UpstreamTimeout(_) => "upstream_timeout",
            GriyaError::VectorIo(_) => "vector_io",
            GriyaError::EmbeddingFailed(_) => "embedding_failed",
            GriyaError::GeocodeFailed(_) => "geocode_failed",
            GriyaError::MemoryInvariant(_) => "memory_invariant",
            GriyaError::ToolHopExhausted(_) => "tool_hop_exhausted",
            GriyaError::RateLimited(_) => "provider_rate_limited",
            GriyaError::InvalidConfig(_) => "internal",
            GriyaError::NotFound(_) => "bad_request",
            GriyaError::Io(_) => "internal",
            GriyaError::Serde(_) => "internal",
            GriyaError::Database(_) => "internal",
            GriyaError::Internal(_) => "internal",
        }
    }

    /// HTTP status the JSON surface maps this error onto.
    pub fn http_status(&self) -> u16 {
        match self {
            GriyaError::BadRequest(_) | GriyaError::NotFound(_) => 400,
            GriyaError::UpstreamUnavailable(_)
            | GriyaError::UpstreamTimeout(_)
            | GriyaError::RateLimited(_) => 502,
            _ => 500,
        }
    }
}
