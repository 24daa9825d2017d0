//! Database types for the indexer storage layer.

use alloy::primitives::{Address, B256, U256};
use civitas_core::{BenefitId, BenefitStatus};

/// A benefit projection as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenefitRecord {
    /// Benefit id (bytes32, primary key)
    pub benefit_id: BenefitId,

    /// Recipient (beneficiary) address
    pub recipient: Address,

    /// Benefit value as read from the contract
    pub value: U256,

    /// Current lifecycle status
    pub status: BenefitStatus,

    /// Timestamp of the issuing block (unix seconds)
    pub issued_at: u64,

    /// On-chain expiration (unix seconds)
    pub expires_at: u64,

    /// Issuing authority
    pub issued_by: Address,

    /// Timestamp of the redeeming block (unix seconds)
    pub redeemed_at: Option<u64>,

    /// Vendor that redeemed the benefit
    pub redeemed_by: Option<Address>,

    /// Block number of the BenefitIssued event
    pub issued_block: u64,

    /// Block number of the BenefitRedeemed event
    pub redeemed_block: Option<u64>,
}

impl BenefitRecord {
    /// Build a freshly issued benefit.
    #[allow(clippy::too_many_arguments)]
    pub fn issued(
        benefit_id: BenefitId,
        recipient: Address,
        value: U256,
        issued_at: u64,
        expires_at: u64,
        issued_by: Address,
        issued_block: u64,
    ) -> Self {
        Self {
            benefit_id,
            recipient,
            value,
            status: BenefitStatus::Issued,
            issued_at,
            expires_at,
            issued_by,
            redeemed_at: None,
            redeemed_by: None,
            issued_block,
            redeemed_block: None,
        }
    }
}

/// A vendor projection as stored in the database.
///
/// Vendors follow **latest-wins** semantics keyed by wallet address: the row
/// remembers the coordinates of the event that last wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRecord {
    /// Vendor wallet address (primary key)
    pub wallet: Address,

    /// Whether the vendor is currently authorized to redeem
    pub is_verified: bool,

    /// Coordinates of the event that set this state
    pub coordinates: BlockCoordinates,

    /// Unix timestamp of the last write
    pub updated_at: i64,
}

/// Result of a guarded status transition on a benefit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row moved from `Issued` to the requested status.
    Applied,
    /// The row already had the requested status.
    Unchanged,
    /// No row for this benefit id.
    NotFound,
    /// The row is in a different terminal status.
    Rejected(BenefitStatus),
}

/// One row of the raw event journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Chain id
    pub chain_id: u64,
    /// Event name (`BenefitIssued`, ...)
    pub event_type: String,
    /// Benefit id or vendor address the event refers to
    pub entity_id: String,
    /// Decoded event arguments as JSON
    pub payload_json: String,
    /// Chain coordinates of the log
    pub coordinates: BlockCoordinates,
    /// Transaction hash
    pub tx_hash: B256,
}

/// A journaled event read back for re-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Journal row id
    pub id: i64,
    /// Event name
    pub event_type: String,
    /// Decoded event arguments as JSON
    pub payload_json: String,
    /// Chain coordinates of the log
    pub coordinates: BlockCoordinates,
    /// Transaction hash
    pub tx_hash: B256,
    /// Outcome recorded for the last attempt
    pub outcome: String,
}

/// Sync state record (singleton).
///
/// Tracks the indexer's progress through the blockchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Last fully processed block number
    pub last_block_number: u64,

    /// Hash of the last processed block (for reorg detection)
    pub last_block_hash: B256,

    /// Unix timestamp of last update
    pub updated_at: i64,

    /// Chain ID (for safety)
    pub chain_id: u64,
}

/// Block coordinates for ordering events (latest-wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockCoordinates {
    /// Block number
    pub block_number: u64,

    /// Transaction index within block
    pub tx_index: u64,

    /// Log index within transaction
    pub log_index: u64,
}

impl BlockCoordinates {
    /// Create new block coordinates.
    pub fn new(block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
        }
    }
}
