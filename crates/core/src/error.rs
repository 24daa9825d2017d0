//! Error types for the core crate.

use thiserror::Error;

use crate::types::BenefitStatus;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Benefit id is not a 0x-prefixed 32-byte hex string.
    #[error("Invalid benefit id: {0}")]
    InvalidBenefitId(String),

    /// Unknown status name.
    #[error("Invalid benefit status: {0}")]
    InvalidStatus(String),

    /// Unknown on-chain status discriminant.
    #[error("Invalid on-chain benefit status code: {0} (must be 0, 1 or 2)")]
    InvalidStatusCode(u8),

    /// Status change that would leave a terminal state.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: BenefitStatus,
        /// Requested status.
        to: BenefitStatus,
    },
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
