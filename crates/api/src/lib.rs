//! Axum-based read API for Civitas.
//!
//! This crate provides:
//! - `/` - Service descriptor
//! - `/benefits/:address` - Benefits issued to a recipient
//! - `/transactions/vendor/:address` - Benefits redeemed by a vendor
//! - `/api/users` - User profile upsert

#![warn(missing_docs)]

pub mod db;
/// API server runtime and in-process app builder.
pub mod server;
