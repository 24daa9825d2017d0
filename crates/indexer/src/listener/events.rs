//! Event type definitions for the WelfareBenefit contract.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use civitas_core::{address_key, BenefitId};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::storage::{BlockCoordinates, JournalEntry};

// WelfareBenefit ABI subset used by the indexer
sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract WelfareBenefit {
        event BenefitIssued(
            bytes32 indexed benefitId,
            address indexed recipient,
            uint256 value,
            uint256 expiration
        );

        event BenefitRedeemed(
            bytes32 indexed benefitId,
            address indexed recipient,
            address indexed vendor
        );

        event VendorRegistered(address indexed vendor);

        event VendorRemoved(address indexed vendor);

        function benefits(bytes32 benefitId) external view returns (
            address recipient,
            uint256 value,
            uint256 expiration,
            address issuingAuthority,
            uint8 status
        );
    }
}

/// Signature hashes of every event the indexer subscribes to.
pub fn subscribed_signatures() -> Vec<B256> {
    vec![
        WelfareBenefit::BenefitIssued::SIGNATURE_HASH,
        WelfareBenefit::BenefitRedeemed::SIGNATURE_HASH,
        WelfareBenefit::VendorRegistered::SIGNATURE_HASH,
        WelfareBenefit::VendorRemoved::SIGNATURE_HASH,
    ]
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    /// A benefit was issued to a recipient.
    BenefitIssued {
        /// Benefit id
        benefit_id: BenefitId,
        /// Recipient address
        recipient: Address,
        /// Value carried in the log
        value: U256,
        /// Expiration carried in the log (unix seconds)
        expiration: U256,
    },

    /// A vendor redeemed a benefit.
    BenefitRedeemed {
        /// Benefit id
        benefit_id: BenefitId,
        /// Recipient address
        recipient: Address,
        /// Redeeming vendor
        vendor: Address,
    },

    /// A vendor was authorized.
    VendorRegistered {
        /// Vendor address
        vendor: Address,
    },

    /// A vendor was de-authorized.
    VendorRemoved {
        /// Vendor address
        vendor: Address,
    },
}

impl LedgerEvent {
    /// Contract event name.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BenefitIssued { .. } => "BenefitIssued",
            LedgerEvent::BenefitRedeemed { .. } => "BenefitRedeemed",
            LedgerEvent::VendorRegistered { .. } => "VendorRegistered",
            LedgerEvent::VendorRemoved { .. } => "VendorRemoved",
        }
    }

    /// Identity of the entity the event mutates (benefit id or vendor address).
    pub fn entity_id(&self) -> String {
        match self {
            LedgerEvent::BenefitIssued { benefit_id, .. }
            | LedgerEvent::BenefitRedeemed { benefit_id, .. } => benefit_id.to_key(),
            LedgerEvent::VendorRegistered { vendor } | LedgerEvent::VendorRemoved { vendor } => {
                address_key(vendor)
            }
        }
    }
}

/// Position of a log on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// Block number where the event occurred
    pub block_number: u64,

    /// Transaction index within the block
    pub tx_index: u64,

    /// Log index within the block
    pub log_index: u64,

    /// Transaction hash
    pub tx_hash: B256,
}

impl EventMeta {
    /// Ordering key of this log.
    pub fn coordinates(&self) -> BlockCoordinates {
        BlockCoordinates::new(self.block_number, self.tx_index, self.log_index)
    }
}

/// Decoded event with block coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    /// Decoded arguments
    pub event: LedgerEvent,

    /// Chain position
    pub meta: EventMeta,
}

impl IndexedEvent {
    /// Parse one of the four subscribed events from an Alloy log.
    pub fn from_log(log: &Log) -> Result<Self, IndexerError> {
        let topic0 = log
            .topics()
            .first()
            .copied()
            .ok_or_else(|| IndexerError::Decode("log has no topics".to_string()))?;

        let event = if topic0 == WelfareBenefit::BenefitIssued::SIGNATURE_HASH {
            let data = WelfareBenefit::BenefitIssued::decode_log(log.as_ref(), true)
                .map_err(|e| IndexerError::Decode(format!("BenefitIssued: {}", e)))?;
            LedgerEvent::BenefitIssued {
                benefit_id: BenefitId::from(data.benefitId),
                recipient: data.recipient,
                value: data.value,
                expiration: data.expiration,
            }
        } else if topic0 == WelfareBenefit::BenefitRedeemed::SIGNATURE_HASH {
            let data = WelfareBenefit::BenefitRedeemed::decode_log(log.as_ref(), true)
                .map_err(|e| IndexerError::Decode(format!("BenefitRedeemed: {}", e)))?;
            LedgerEvent::BenefitRedeemed {
                benefit_id: BenefitId::from(data.benefitId),
                recipient: data.recipient,
                vendor: data.vendor,
            }
        } else if topic0 == WelfareBenefit::VendorRegistered::SIGNATURE_HASH {
            let data = WelfareBenefit::VendorRegistered::decode_log(log.as_ref(), true)
                .map_err(|e| IndexerError::Decode(format!("VendorRegistered: {}", e)))?;
            LedgerEvent::VendorRegistered {
                vendor: data.vendor,
            }
        } else if topic0 == WelfareBenefit::VendorRemoved::SIGNATURE_HASH {
            let data = WelfareBenefit::VendorRemoved::decode_log(log.as_ref(), true)
                .map_err(|e| IndexerError::Decode(format!("VendorRemoved: {}", e)))?;
            LedgerEvent::VendorRemoved {
                vendor: data.vendor,
            }
        } else {
            return Err(IndexerError::Decode(format!(
                "unknown event signature {}",
                topic0
            )));
        };

        let missing = |field: &str| IndexerError::Decode(format!("log missing {}", field));
        let meta = EventMeta {
            block_number: log.block_number.ok_or_else(|| missing("block_number"))?,
            tx_index: log
                .transaction_index
                .ok_or_else(|| missing("transaction_index"))?,
            log_index: log.log_index.ok_or_else(|| missing("log_index"))?,
            tx_hash: log
                .transaction_hash
                .ok_or_else(|| missing("transaction_hash"))?,
        };

        Ok(Self { event, meta })
    }

    /// Rebuild an event from its journal row.
    pub fn from_journal(entry: &JournalEntry) -> Result<Self, IndexerError> {
        let event: LedgerEvent = serde_json::from_str(&entry.payload_json).map_err(|e| {
            IndexerError::Decode(format!("journal entry {} payload: {}", entry.id, e))
        })?;

        Ok(Self {
            event,
            meta: EventMeta {
                block_number: entry.coordinates.block_number,
                tx_index: entry.coordinates.tx_index,
                log_index: entry.coordinates.log_index,
                tx_hash: entry.tx_hash,
            },
        })
    }

    /// Decoded arguments as JSON (journal payload).
    pub fn payload_json(&self) -> String {
        serde_json::to_string(&self.event).unwrap_or_else(|_| "{}".to_string())
    }
}
