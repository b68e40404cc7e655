//! Protocol-level error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed register {register}: {reason}")]
    MalformedRegister { register: String, reason: String },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Box exceeds the maximum size by {excess} bytes")]
    InfeasibleSize { excess: usize },

    #[error("Program compilation failed: {0}")]
    Compilation(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl ProtocolError {
    pub fn malformed(register: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRegister {
            register: register.into(),
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed(reason.into())
    }

    /// Attribute a low-level decode failure to a concrete register slot.
    pub fn in_register(self, register: &str) -> Self {
        match self {
            Self::MalformedRegister { reason, .. } => Self::MalformedRegister {
                register: register.to_string(),
                reason,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
