//! Benefit storage operations.
//!
//! Every status change is a single guarded `UPDATE ... WHERE status = 'Issued'`,
//! so a benefit can never leave `Redeemed` or `Expired`, whichever writer
//! (supervisor or reconciler) gets there first.

use super::{BenefitRecord, Storage, TransitionOutcome};
use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use civitas_core::{address_key, BenefitId, BenefitStatus};
use sqlx::Row;
use std::str::FromStr;

const BENEFIT_COLUMNS: &str = r#"
    benefit_id, recipient_address, value, status,
    issued_at, expires_at, issued_by_address,
    redeemed_at, redeemed_by_address,
    issued_block, redeemed_block
"#;

impl Storage {
    /// Insert a newly issued benefit.
    ///
    /// Returns `true` if the row was created, `false` if a row with the same
    /// benefit id already exists (duplicate delivery). Existing rows are never
    /// overwritten.
    pub async fn insert_benefit(&self, benefit: &BenefitRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO benefits (
                benefit_id, recipient_address, value, status,
                issued_at, expires_at, issued_by_address,
                redeemed_at, redeemed_by_address,
                issued_block, redeemed_block
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(benefit_id) DO NOTHING
            "#,
        )
        .bind(benefit.benefit_id.to_key())
        .bind(address_key(&benefit.recipient))
        .bind(benefit.value.to_string())
        .bind(benefit.status.as_str())
        .bind(benefit.issued_at as i64)
        .bind(
            i64::try_from(benefit.expires_at)
                .context("Benefit expiration exceeds the storable range")?,
        )
        .bind(address_key(&benefit.issued_by))
        .bind(benefit.redeemed_at.map(|v| v as i64))
        .bind(benefit.redeemed_by.as_ref().map(address_key))
        .bind(benefit.issued_block as i64)
        .bind(benefit.redeemed_block.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .context("Failed to insert benefit")?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an `Issued` benefit to `Redeemed`.
    pub async fn mark_benefit_redeemed(
        &self,
        benefit_id: &BenefitId,
        vendor: &Address,
        redeemed_at: u64,
        block_number: u64,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE benefits
            SET status = 'Redeemed',
                redeemed_at = ?,
                redeemed_by_address = ?,
                redeemed_block = ?
            WHERE benefit_id = ?
              AND status = 'Issued'
            "#,
        )
        .bind(redeemed_at as i64)
        .bind(address_key(vendor))
        .bind(block_number as i64)
        .bind(benefit_id.to_key())
        .execute(&self.pool)
        .await
        .context("Failed to mark benefit redeemed")?;

        if result.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied);
        }

        self.classify_missed_transition(benefit_id, BenefitStatus::Redeemed)
            .await
    }

    /// Move an `Issued` benefit to `Expired`.
    pub async fn mark_benefit_expired(&self, benefit_id: &BenefitId) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE benefits
            SET status = 'Expired'
            WHERE benefit_id = ?
              AND status = 'Issued'
            "#,
        )
        .bind(benefit_id.to_key())
        .execute(&self.pool)
        .await
        .context("Failed to mark benefit expired")?;

        if result.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied);
        }

        self.classify_missed_transition(benefit_id, BenefitStatus::Expired)
            .await
    }

    async fn classify_missed_transition(
        &self,
        benefit_id: &BenefitId,
        target: BenefitStatus,
    ) -> Result<TransitionOutcome> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM benefits WHERE benefit_id = ?")
                .bind(benefit_id.to_key())
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read benefit status")?;

        let Some(status) = status else {
            return Ok(TransitionOutcome::NotFound);
        };
        let current = BenefitStatus::from_str(&status)?;

        match current.transition_to(target) {
            Ok(_) if current == target => Ok(TransitionOutcome::Unchanged),
            Ok(_) => anyhow::bail!(
                "benefit {} is {} but the guarded update matched no row",
                benefit_id,
                current
            ),
            Err(_) => Ok(TransitionOutcome::Rejected(current)),
        }
    }

    /// Fetch a benefit by id.
    pub async fn get_benefit(&self, benefit_id: &BenefitId) -> Result<Option<BenefitRecord>> {
        let query = format!("SELECT {BENEFIT_COLUMNS} FROM benefits WHERE benefit_id = ?");
        let row = sqlx::query(&query)
            .bind(benefit_id.to_key())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_benefit_record).transpose()
    }

    /// All benefits currently in `status` (used by reconciliation).
    pub async fn list_benefits_by_status(&self, status: BenefitStatus) -> Result<Vec<BenefitRecord>> {
        let query = format!(
            "SELECT {BENEFIT_COLUMNS} FROM benefits WHERE status = ? ORDER BY issued_block ASC"
        );
        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_benefit_record).collect()
    }

    fn row_to_benefit_record(row: sqlx::sqlite::SqliteRow) -> Result<BenefitRecord> {
        let benefit_id: String = row.get("benefit_id");
        let recipient: String = row.get("recipient_address");
        let value: String = row.get("value");
        let status: String = row.get("status");
        let issued_by: String = row.get("issued_by_address");
        let redeemed_by: Option<String> = row.get("redeemed_by_address");
        let redeemed_at: Option<i64> = row.get("redeemed_at");
        let redeemed_block: Option<i64> = row.get("redeemed_block");

        let value = U256::from_str_radix(&value, 10)
            .map_err(|e| anyhow::anyhow!("Invalid benefit value in database: {}", e))?;

        Ok(BenefitRecord {
            benefit_id: benefit_id.parse()?,
            recipient: Address::from_str(&recipient)
                .context("Invalid recipient address in database")?,
            value,
            status: status.parse()?,
            issued_at: row.get::<i64, _>("issued_at") as u64,
            expires_at: row.get::<i64, _>("expires_at") as u64,
            issued_by: Address::from_str(&issued_by)
                .context("Invalid issuer address in database")?,
            redeemed_at: redeemed_at.map(|v| v as u64),
            redeemed_by: redeemed_by
                .as_deref()
                .map(Address::from_str)
                .transpose()
                .context("Invalid vendor address in database")?,
            issued_block: row.get::<i64, _>("issued_block") as u64,
            redeemed_block: redeemed_block.map(|v| v as u64),
        })
    }
}
