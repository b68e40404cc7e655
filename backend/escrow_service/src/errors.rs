//! Application-wide error types.

use escrow_protocol::ProtocolError;
use serde::Serialize;
use thiserror::Error;

/// Node messages that mean an input was consumed by someone else first.
const DOUBLE_SPEND_MARKERS: &[&str] = &[
    "double spending",
    "inputs are already spent",
    "input box not found",
    "every input of the transaction should be in utxo",
];

const INSUFFICIENT_FUNDS_MARKERS: &[&str] = &["not enough", "insufficient", "not have enough"];

const REJECTED_MARKERS: &[&str] = &["rejected", "wallet is locked", "cancelled by user"];

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Signing was rejected: {0}")]
    UserRejected(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("An input was already spent by another transaction; refresh and try again ({0})")]
    LikelyDoubleSpend(String),

    #[error("{0}")]
    Other(String),
}

impl WalletError {
    /// Sort a wallet or node failure message into its sub-kind.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
        if has(DOUBLE_SPEND_MARKERS) {
            WalletError::LikelyDoubleSpend(message)
        } else if has(INSUFFICIENT_FUNDS_MARKERS) {
            WalletError::InsufficientFunds(message)
        } else if has(REJECTED_MARKERS) {
            WalletError::UserRejected(message)
        } else {
            WalletError::Other(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Box {0} is reserved by an operation in flight; retry shortly")]
    BoxReserved(String),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Project {0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Tag hosts use to render distinct guidance per failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedRegister,
    UnsupportedVersion,
    PreconditionFailed,
    BoxReserved,
    InfeasibleSize,
    InvalidAddress,
    Compilation,
    UserRejected,
    InsufficientFunds,
    LikelyDoubleSpend,
    Wallet,
    Network,
    Config,
    NotFound,
    BadRequest,
}

impl ServiceError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        ServiceError::Protocol(ProtocolError::precondition(reason))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Protocol(e) => match e {
                ProtocolError::MalformedRegister { .. } => ErrorKind::MalformedRegister,
                ProtocolError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
                ProtocolError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
                ProtocolError::InfeasibleSize { .. } => ErrorKind::InfeasibleSize,
                ProtocolError::Compilation(_) => ErrorKind::Compilation,
                ProtocolError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            },
            ServiceError::BoxReserved(_) => ErrorKind::BoxReserved,
            ServiceError::Wallet(w) => match w {
                WalletError::UserRejected(_) => ErrorKind::UserRejected,
                WalletError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
                WalletError::LikelyDoubleSpend(_) => ErrorKind::LikelyDoubleSpend,
                WalletError::Other(_) => ErrorKind::Wallet,
            },
            ServiceError::Network(_) | ServiceError::Http(_) | ServiceError::Json(_) => {
                ErrorKind::Network
            }
            ServiceError::Config(_) => ErrorKind::Config,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::BadRequest(_) => ErrorKind::BadRequest,
        }
    }

    /// Transient failures a caller may retry with back-off.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::BoxReserved)
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
