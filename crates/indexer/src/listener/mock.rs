//! In-memory ledger for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use anyhow::{bail, Result};
use async_trait::async_trait;
use civitas_core::BenefitId;

use super::events::{EventMeta, IndexedEvent, LedgerEvent};
use super::provider::{BlockHeader, Ledger, OnChainBenefit};

pub(crate) const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Default)]
struct MockState {
    head: u64,
    events: Vec<IndexedEvent>,
    benefits: HashMap<BenefitId, OnChainBenefit>,
    fail_event_fetches: u32,
    block_hash_salt: u8,
    panic_on_poll: bool,
}

#[derive(Default)]
pub(crate) struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub(crate) fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub(crate) fn push_event(&self, event: IndexedEvent) {
        let mut state = self.state.lock().unwrap();
        state.head = state.head.max(event.meta.block_number);
        state.events.push(event);
    }

    pub(crate) fn put_benefit(&self, id: BenefitId, record: OnChainBenefit) {
        self.state.lock().unwrap().benefits.insert(id, record);
    }

    pub(crate) fn set_benefit_status(&self, id: &BenefitId, status: u8) {
        if let Some(record) = self.state.lock().unwrap().benefits.get_mut(id) {
            record.status = status;
        }
    }

    /// Make the next `count` event fetches fail.
    pub(crate) fn fail_next_event_fetches(&self, count: u32) {
        self.state.lock().unwrap().fail_event_fetches = count;
    }

    /// Make `latest_block` panic, crashing whichever task polls it.
    pub(crate) fn panic_on_poll(&self) {
        self.state.lock().unwrap().panic_on_poll = true;
    }

    /// Change every block hash, as if the chain reorganized.
    pub(crate) fn reorg(&self) {
        self.state.lock().unwrap().block_hash_salt += 1;
    }

    pub(crate) fn timestamp_of(block: u64) -> u64 {
        GENESIS_TIMESTAMP + block * 12
    }

    /// Register an issued benefit on chain and queue its event.
    pub(crate) fn issue(
        &self,
        id: BenefitId,
        recipient: Address,
        value: u64,
        expiration: u64,
        at: EventMeta,
    ) {
        self.put_benefit(
            id,
            OnChainBenefit {
                recipient,
                value: U256::from(value),
                expiration: U256::from(expiration),
                issuing_authority: authority(),
                status: 0,
            },
        );
        self.push_event(IndexedEvent {
            event: LedgerEvent::BenefitIssued {
                benefit_id: id,
                recipient,
                value: U256::from(value),
                expiration: U256::from(expiration),
            },
            meta: at,
        });
    }
}

pub(crate) fn authority() -> Address {
    Address::repeat_byte(0xa0)
}

pub(crate) fn meta(block_number: u64, log_index: u64) -> EventMeta {
    EventMeta {
        block_number,
        tx_index: 0,
        log_index,
        tx_hash: B256::from(U256::from(block_number * 1_000 + log_index)),
    }
}

pub(crate) fn redeemed(id: BenefitId, recipient: Address, vendor: Address, at: EventMeta) -> IndexedEvent {
    IndexedEvent {
        event: LedgerEvent::BenefitRedeemed {
            benefit_id: id,
            recipient,
            vendor,
        },
        meta: at,
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn latest_block(&self) -> Result<u64> {
        let (head, panic_on_poll) = {
            let state = self.state.lock().unwrap();
            (state.head, state.panic_on_poll)
        };
        if panic_on_poll {
            panic!("ledger connection poisoned");
        }
        Ok(head)
    }

    async fn block_header(&self, number: u64) -> Result<BlockHeader> {
        let salt = self.state.lock().unwrap().block_hash_salt;
        let mut hash = B256::from(U256::from(number));
        hash.0[0] = salt;
        Ok(BlockHeader {
            number,
            hash,
            timestamp: Self::timestamp_of(number),
        })
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<IndexedEvent>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_event_fetches > 0 {
            state.fail_event_fetches -= 1;
            bail!("connection refused");
        }
        Ok(state
            .events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.meta.block_number))
            .cloned()
            .collect())
    }

    async fn benefit_at(&self, benefit_id: &BenefitId, _block: Option<u64>) -> Result<OnChainBenefit> {
        let state = self.state.lock().unwrap();
        Ok(state
            .benefits
            .get(benefit_id)
            .cloned()
            .unwrap_or(OnChainBenefit {
                recipient: Address::ZERO,
                value: U256::ZERO,
                expiration: U256::ZERO,
                issuing_authority: Address::ZERO,
                status: 0,
            }))
    }

    async fn redemption_events(
        &self,
        benefit_id: &BenefitId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IndexedEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.meta.block_number))
            .filter(|e| {
                matches!(&e.event, LedgerEvent::BenefitRedeemed { benefit_id: id, .. } if id == benefit_id)
            })
            .cloned()
            .collect())
    }
}
