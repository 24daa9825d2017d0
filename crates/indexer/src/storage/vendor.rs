//! Vendor storage operations.

use super::{BlockCoordinates, Storage, VendorRecord};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use civitas_core::address_key;
use sqlx::Row;
use std::str::FromStr;

impl Storage {
    /// Upsert a vendor with deterministic latest-wins semantics.
    ///
    /// The row is only overwritten by an event with strictly greater
    /// `(block, tx, log)` coordinates, so replaying the same event, or an
    /// older one, leaves the stored state untouched.
    ///
    /// Returns `true` if inserted/updated, `false` if stale.
    pub async fn upsert_vendor(&self, vendor: &VendorRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO vendors (
                wallet_address, is_verified,
                block_number, tx_index, log_index,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(wallet_address)
            DO UPDATE SET
                is_verified = excluded.is_verified,
                block_number = excluded.block_number,
                tx_index = excluded.tx_index,
                log_index = excluded.log_index,
                updated_at = excluded.updated_at
            WHERE (excluded.block_number > vendors.block_number)
               OR (excluded.block_number = vendors.block_number AND excluded.tx_index > vendors.tx_index)
               OR (excluded.block_number = vendors.block_number AND excluded.tx_index = vendors.tx_index AND excluded.log_index > vendors.log_index)
            "#,
        )
        .bind(address_key(&vendor.wallet))
        .bind(vendor.is_verified)
        .bind(vendor.coordinates.block_number as i64)
        .bind(vendor.coordinates.tx_index as i64)
        .bind(vendor.coordinates.log_index as i64)
        .bind(vendor.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert vendor")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a vendor by wallet address.
    pub async fn get_vendor(&self, wallet: &Address) -> Result<Option<VendorRecord>> {
        let row = sqlx::query(
            r#"
            SELECT wallet_address, is_verified, block_number, tx_index, log_index, updated_at
            FROM vendors
            WHERE wallet_address = ?
            "#,
        )
        .bind(address_key(wallet))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_vendor_record).transpose()
    }

    fn row_to_vendor_record(row: sqlx::sqlite::SqliteRow) -> Result<VendorRecord> {
        let wallet: String = row.get("wallet_address");

        Ok(VendorRecord {
            wallet: Address::from_str(&wallet).context("Invalid vendor address in database")?,
            is_verified: row.get("is_verified"),
            coordinates: BlockCoordinates::new(
                row.get::<i64, _>("block_number") as u64,
                row.get::<i64, _>("tx_index") as u64,
                row.get::<i64, _>("log_index") as u64,
            ),
            updated_at: row.get("updated_at"),
        })
    }
}
