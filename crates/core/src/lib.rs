//! # Civitas Core
//!
//! Domain types shared by the Civitas indexer and read API.
//!
//! ## Features
//!
//! - **Ethereum Types**: Uses Alloy primitives for Address, B256 and U256
//! - **Domain Types**: BenefitId, BenefitStatus
//! - **Address keys**: canonical lowercase hex form used as store keys

#![warn(missing_docs)]

pub mod error;
pub mod types;

// Re-export commonly used items
pub use error::{CoreError, Result};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
