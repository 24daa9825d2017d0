//! Error taxonomy for event handling.
//!
//! Every variant is contained at the per-event boundary by the supervisor:
//! it is logged with the event identity and the event is dropped.

use thiserror::Error;

/// Why an event could not be projected.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Malformed event payload, or an on-chain record that contradicts it.
    #[error("Malformed event: {0}")]
    Decode(String),

    /// The event updates an entity that has not been projected yet.
    #[error("{entity} {id} is not projected")]
    MissingEntity {
        /// Entity kind (`benefit`, `vendor`).
        entity: &'static str,
        /// Benefit id or address.
        id: String,
    },

    /// Persistence failure.
    #[error("Projection store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),

    /// On-chain read-back failure.
    #[error("Ledger read failed: {0:#}")]
    Ledger(anyhow::Error),
}

impl IndexerError {
    /// Every label `kind` can return.
    pub const KINDS: [&'static str; 4] = [
        "decode_error",
        "missing_entity",
        "store_unavailable",
        "ledger_error",
    ];

    /// Short label recorded in the event journal.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Decode(_) => "decode_error",
            IndexerError::MissingEntity { .. } => "missing_entity",
            IndexerError::StoreUnavailable(_) => "store_unavailable",
            IndexerError::Ledger(_) => "ledger_error",
        }
    }
}

/// Result type alias for IndexerError.
pub type Result<T> = std::result::Result<T, IndexerError>;
