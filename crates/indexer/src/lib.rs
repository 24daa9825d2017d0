//! WelfareBenefit event ingestion for Civitas.
//!
//! This crate provides:
//! - Decoding of the four contract events into a closed `LedgerEvent` enum
//! - Event handlers projecting benefits and vendors into SQLite
//! - The indexer supervisor (historical catch-up, live polling, journal)
//! - Periodic reconciliation against on-chain benefit records
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────┐
//! │  civitas-indexer (this)        │
//! │                                │
//! │  ┌──────────────────────┐      │
//! │  │ IndexerSupervisor    │ ← Ethereum RPC
//! │  │ (tokio task)         │   BenefitIssued, BenefitRedeemed,
//! │  └─────────┬────────────┘   VendorRegistered, VendorRemoved
//! │            │                   │
//! │     ┌──────▼──────┐            │
//! │     │ EventHandlers│ ← benefits(bytes32) read-back
//! │     └──────┬──────┘            │
//! │            │                   │
//! │     ┌──────▼──────┐  ┌────────────┐
//! │     │  Storage    │◄─┤ Reconciler │
//! │     │  (SQLite)   │  │ (periodic) │
//! │     └──────┬──────┘  └────────────┘
//! └────────────┼───────────────────┘
//!              │ Shared DB
//! ┌────────────▼───────────────────┐
//! │  civitas-api (separate)        │
//! │  • GET /benefits/:address      │
//! │  • GET /transactions/vendor/:a │
//! │  • POST /api/users             │
//! └────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod reconcile;
pub mod storage;

pub use civitas_core::{address_key, normalize_address, BenefitId, BenefitStatus, CoreError};
pub use error::IndexerError;
