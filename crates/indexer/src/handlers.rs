//! Event handlers: one projection step per ledger event.
//!
//! Each handler optionally reads back authoritative data from the ledger
//! (benefit record, block timestamp) and then performs a single idempotent
//! write against the projection store.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use civitas_core::{address_key, BenefitId, BenefitStatus};
use tracing::{debug, info, warn};

use crate::error::{IndexerError, Result};
use crate::listener::{EventMeta, IndexedEvent, Ledger, LedgerEvent};
use crate::storage::{BenefitRecord, Storage, TransitionOutcome, VendorRecord};

/// Largest expiration the store can hold. Later values (for example
/// `type(uint64).max` used as "never expires") are stored as this ceiling.
pub const EXPIRATION_CEILING: u64 = i64::MAX as u64;

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The projection changed.
    Applied,
    /// The entity was already created by an earlier delivery.
    Duplicate,
    /// The projection already reflects the event (replay or stale event).
    Unchanged,
    /// The benefit sits in a terminal status that the event cannot leave.
    Rejected(BenefitStatus),
}

impl HandlerOutcome {
    /// Label recorded in the event journal.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Applied => "applied",
            HandlerOutcome::Duplicate => "duplicate",
            HandlerOutcome::Unchanged => "unchanged",
            HandlerOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Projects decoded ledger events into the store.
pub struct EventHandlers<L: Ledger + ?Sized> {
    ledger: Arc<L>,
    storage: Storage,
}

impl<L: Ledger + ?Sized> Clone for EventHandlers<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            storage: self.storage.clone(),
        }
    }
}

impl<L: Ledger + ?Sized> EventHandlers<L> {
    /// Create handlers writing to `storage`.
    pub fn new(ledger: Arc<L>, storage: Storage) -> Self {
        Self { ledger, storage }
    }

    /// Apply one event.
    pub async fn apply(&self, event: &IndexedEvent) -> Result<HandlerOutcome> {
        match &event.event {
            LedgerEvent::BenefitIssued {
                benefit_id,
                recipient,
                value,
                expiration,
            } => {
                self.on_benefit_issued(benefit_id, *recipient, *value, *expiration, &event.meta)
                    .await
            }
            LedgerEvent::BenefitRedeemed {
                benefit_id, vendor, ..
            } => self.on_benefit_redeemed(benefit_id, *vendor, &event.meta).await,
            LedgerEvent::VendorRegistered { vendor } => {
                self.on_vendor_changed(*vendor, true, &event.meta).await
            }
            LedgerEvent::VendorRemoved { vendor } => {
                self.on_vendor_changed(*vendor, false, &event.meta).await
            }
        }
    }

    async fn on_benefit_issued(
        &self,
        benefit_id: &BenefitId,
        recipient: Address,
        log_value: U256,
        log_expiration: U256,
        meta: &EventMeta,
    ) -> Result<HandlerOutcome> {
        let on_chain = self
            .ledger
            .benefit_at(benefit_id, Some(meta.block_number))
            .await
            .map_err(IndexerError::Ledger)?;

        if !on_chain.exists() {
            return Err(IndexerError::Decode(format!(
                "benefit {} has no on-chain record at block {}",
                benefit_id, meta.block_number
            )));
        }
        if on_chain.recipient != recipient {
            warn!(
                benefit_id = %benefit_id,
                log_recipient = %address_key(&recipient),
                chain_recipient = %address_key(&on_chain.recipient),
                "Recipient in log differs from on-chain record"
            );
        }
        if on_chain.value != log_value || on_chain.expiration != log_expiration {
            debug!(benefit_id = %benefit_id, "Using on-chain value/expiration over log payload");
        }

        let expires_at = match u64::try_from(on_chain.expiration) {
            Ok(secs) if secs <= EXPIRATION_CEILING => secs,
            _ => {
                debug!(
                    benefit_id = %benefit_id,
                    expiration = %on_chain.expiration,
                    "Expiration beyond the storable range, clamping"
                );
                EXPIRATION_CEILING
            }
        };

        let header = self
            .ledger
            .block_header(meta.block_number)
            .await
            .map_err(IndexerError::Ledger)?;

        let record = BenefitRecord::issued(
            *benefit_id,
            on_chain.recipient,
            on_chain.value,
            header.timestamp,
            expires_at,
            on_chain.issuing_authority,
            meta.block_number,
        );

        let created = self
            .storage
            .insert_benefit(&record)
            .await
            .map_err(IndexerError::StoreUnavailable)?;

        if created {
            info!(
                benefit_id = %benefit_id,
                recipient = %address_key(&record.recipient),
                value = %record.value,
                block = meta.block_number,
                "Benefit issued"
            );
            Ok(HandlerOutcome::Applied)
        } else {
            warn!(
                benefit_id = %benefit_id,
                block = meta.block_number,
                "Duplicate BenefitIssued ignored"
            );
            Ok(HandlerOutcome::Duplicate)
        }
    }

    async fn on_benefit_redeemed(
        &self,
        benefit_id: &BenefitId,
        vendor: Address,
        meta: &EventMeta,
    ) -> Result<HandlerOutcome> {
        let header = self
            .ledger
            .block_header(meta.block_number)
            .await
            .map_err(IndexerError::Ledger)?;

        let outcome = self
            .storage
            .mark_benefit_redeemed(benefit_id, &vendor, header.timestamp, meta.block_number)
            .await
            .map_err(IndexerError::StoreUnavailable)?;

        match outcome {
            TransitionOutcome::Applied => {
                info!(
                    benefit_id = %benefit_id,
                    vendor = %address_key(&vendor),
                    block = meta.block_number,
                    "Benefit redeemed"
                );
                Ok(HandlerOutcome::Applied)
            }
            TransitionOutcome::Unchanged => Ok(HandlerOutcome::Unchanged),
            TransitionOutcome::NotFound => Err(IndexerError::MissingEntity {
                entity: "benefit",
                id: benefit_id.to_key(),
            }),
            TransitionOutcome::Rejected(current) => {
                warn!(
                    benefit_id = %benefit_id,
                    status = %current,
                    block = meta.block_number,
                    "Redemption of a terminal benefit ignored"
                );
                Ok(HandlerOutcome::Rejected(current))
            }
        }
    }

    async fn on_vendor_changed(
        &self,
        vendor: Address,
        is_verified: bool,
        meta: &EventMeta,
    ) -> Result<HandlerOutcome> {
        let record = VendorRecord {
            wallet: vendor,
            is_verified,
            coordinates: meta.coordinates(),
            updated_at: chrono::Utc::now().timestamp(),
        };

        let updated = self
            .storage
            .upsert_vendor(&record)
            .await
            .map_err(IndexerError::StoreUnavailable)?;

        if updated {
            info!(
                vendor = %address_key(&vendor),
                is_verified,
                block = meta.block_number,
                "Vendor updated"
            );
            Ok(HandlerOutcome::Applied)
        } else {
            Ok(HandlerOutcome::Unchanged)
        }
    }
}
