//! Ledger access: the `Ledger` trait and its JSON-RPC implementation.

use alloy::eips::BlockId;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use civitas_core::{BenefitId, BenefitStatus};

use super::events::{subscribed_signatures, IndexedEvent, WelfareBenefit};

/// Block number, hash and timestamp of a canonical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Block timestamp (unix seconds)
    pub timestamp: u64,
}

/// Authoritative benefit record as returned by `benefits(bytes32)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainBenefit {
    /// Recipient, zero when the id is unknown
    pub recipient: Address,
    /// Benefit value
    pub value: U256,
    /// Expiration (unix seconds)
    pub expiration: U256,
    /// Authority that issued the benefit
    pub issuing_authority: Address,
    /// Raw status code (0 Issued, 1 Redeemed, 2 Expired)
    pub status: u8,
}

impl OnChainBenefit {
    /// The contract returns a zeroed struct for unknown ids.
    pub fn exists(&self) -> bool {
        self.recipient != Address::ZERO
    }

    /// Decoded status, `None` for codes the contract does not define.
    pub fn status(&self) -> Option<BenefitStatus> {
        BenefitStatus::from_chain_code(self.status).ok()
    }
}

/// Read access to the welfare ledger.
///
/// The supervisor, handlers and reconciler only talk to the chain through
/// this trait so tests can drive them with an in-memory ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest block number known to the node.
    async fn latest_block(&self) -> Result<u64>;

    /// Header of block `number`.
    async fn block_header(&self, number: u64) -> Result<BlockHeader>;

    /// Decoded contract events in `[from_block, to_block]`.
    ///
    /// Logs that fail to decode are skipped with a warning.
    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<IndexedEvent>>;

    /// On-chain benefit record, as of `block` when given, else latest.
    async fn benefit_at(&self, benefit_id: &BenefitId, block: Option<u64>)
        -> Result<OnChainBenefit>;

    /// `BenefitRedeemed` events for one benefit in `[from_block, to_block]`.
    async fn redemption_events(
        &self,
        benefit_id: &BenefitId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IndexedEvent>>;
}

/// HTTP RPC ledger for the WelfareBenefit contract.
#[derive(Clone)]
pub struct RpcLedger {
    provider: RootProvider<Http<Client>>,
    contract: Address,
}

impl RpcLedger {
    /// Create a new RPC ledger.
    pub async fn new(rpc_url: &str, contract: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider, contract })
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")
    }

    async fn fetch_logs(&self, filter: Filter) -> Result<Vec<IndexedEvent>> {
        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .context("Failed to fetch logs from RPC")?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match IndexedEvent::from_log(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        block = ?log.block_number,
                        log_index = ?log.log_index,
                        "Failed to decode contract event: {}",
                        e
                    );
                }
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn block_header(&self, number: u64) -> Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number), BlockTransactionsKind::Hashes)
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?
            .with_context(|| format!("Block {} not found", number))?;

        Ok(BlockHeader {
            number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<IndexedEvent>> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(subscribed_signatures())
            .from_block(from_block)
            .to_block(to_block);

        self.fetch_logs(filter).await
    }

    async fn benefit_at(
        &self,
        benefit_id: &BenefitId,
        block: Option<u64>,
    ) -> Result<OnChainBenefit> {
        let contract = WelfareBenefit::new(self.contract, self.provider.clone());
        let mut call = contract.benefits(*benefit_id.inner());
        if let Some(number) = block {
            call = call.block(BlockId::number(number));
        }

        let record = call
            .call()
            .await
            .with_context(|| format!("Failed to read benefits({})", benefit_id))?;

        Ok(OnChainBenefit {
            recipient: record.recipient,
            value: record.value,
            expiration: record.expiration,
            issuing_authority: record.issuingAuthority,
            status: record.status,
        })
    }

    async fn redemption_events(
        &self,
        benefit_id: &BenefitId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IndexedEvent>> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(WelfareBenefit::BenefitRedeemed::SIGNATURE_HASH)
            .topic1(*benefit_id.inner())
            .from_block(from_block)
            .to_block(to_block);

        self.fetch_logs(filter).await
    }
}
