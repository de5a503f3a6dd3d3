use thiserror::Error;

/// Error taxonomy from spec §7. Each variant is one kind; the Retry Engine,
/// Circuit Breaker, and Orchestrator all switch on this enum rather than on
/// exception types, per the Design Notes (§9).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("io unavailable: {0}")]
    IoUnavailable(String),

    #[error("network exhausted after retries: {0}")]
    NetworkExhausted(String),

    #[error("rate limited persistently: {0}")]
    RateLimitedPersistent(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("selector fallback exhausted on field {0}")]
    ParseIncomplete(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("corrupt blob {0}")]
    CorruptBlob(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// The taxonomy name used in logs, metrics, and `RunReport::errors`.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::ConfigInvalid(_) => "config_invalid",
            IngestError::IoUnavailable(_) => "io_unavailable",
            IngestError::NetworkExhausted(_) => "network_exhausted",
            IngestError::RateLimitedPersistent(_) => "rate_limited_persistent",
            IngestError::CircuitOpen(_) => "circuit_open",
            IngestError::ParseIncomplete(_) => "parse_incomplete",
            IngestError::SchemaViolation(_) => "schema_violation",
            IngestError::Cancelled => "cancelled",
            IngestError::CorruptBlob(_) => "corrupt_blob",
            IngestError::Other(_) => "other",
        }
    }

    /// Process-level failures abort the run immediately (§7).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::ConfigInvalid(_) | IngestError::IoUnavailable(_) | IngestError::Cancelled
        )
    }

    /// Exit code for a CLI embedding the orchestrator (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::ConfigInvalid(_) => 2,
            IngestError::IoUnavailable(_) => 3,
            IngestError::Cancelled => 4,
            _ => 1,
        }
    }
}

/// Failure classification used by the Retry Engine (§4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    TransientNetwork,
    Timeout,
    RateLimited,
    ServerError,
    ClientError,
    ParseError,
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureClass::TransientNetwork
                | FailureClass::Timeout
                | FailureClass::RateLimited
                | FailureClass::ServerError
        )
    }

    /// Classify an HTTP status code per the §4.2 table.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureClass::RateLimited,
            408 => FailureClass::Timeout,
            500..=599 => FailureClass::ServerError,
            400..=499 => FailureClass::ClientError,
            _ => FailureClass::TransientNetwork,
        }
    }
}
