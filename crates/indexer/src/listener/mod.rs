//! Ledger event listener for the WelfareBenefit contract.
//!
//! This module provides:
//! - Event type definitions and log decoding
//! - The `Ledger` read interface and its JSON-RPC implementation
//! - The supervisor driving historical catch-up and live polling

pub mod events;
pub mod provider;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod mock;

pub use events::{EventMeta, IndexedEvent, LedgerEvent, WelfareBenefit};
pub use provider::{BlockHeader, Ledger, OnChainBenefit, RpcLedger};
pub use supervisor::{IndexerSupervisor, PollStatus, RangeSummary, SupervisorHandle};
