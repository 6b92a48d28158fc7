use thiserror::Error;

use crate::services::placement_validator::PlacementError;

// Clone is required because coalesced fetches hand the same result to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Invalid placement: {0}")]
    Validation(#[from] PlacementError),

    #[error("No staged moves to submit")]
    NoStagedMoves,

    #[error("A submission is already in progress")]
    SubmissionInProgress,

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("Confirmation timed out for transaction {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the UI layer.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NoStagedMoves => "NO_STAGED_MOVES",
            AppError::SubmissionInProgress => "SUBMISSION_IN_PROGRESS",
            AppError::SubmissionRejected(_) => "SUBMISSION_REJECTED",
            AppError::TransactionFailed(_) => "TRANSACTION_FAILED",
            AppError::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::BlockchainRPC(_) => "RPC_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors a caller may simply retry later.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::RateLimited => true,
            AppError::BlockchainRPC(message) => is_transient_rpc_message(message),
            _ => false,
        }
    }

    /// Maps a raw provider error message onto the error taxonomy.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            return AppError::RateLimited;
        }
        if is_transient_rpc_message(&message) {
            return AppError::Network(message);
        }
        AppError::BlockchainRPC(message)
    }
}

// Internal helper that checks conditions for `is_rate_limit_message`.
fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("too many requests") || lower.contains("429") || lower.contains("rate limit")
}

// Internal helper that checks conditions for `is_transient_rpc_message`.
fn is_transient_rpc_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("error decoding response body")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("gateway")
        || lower.contains("temporarily unavailable")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("eof while parsing")
}

pub type Result<T> = std::result::Result<T, AppError>;
