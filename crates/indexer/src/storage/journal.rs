//! Append-only journal of decoded ledger events.

use super::{BlockCoordinates, JournalEntry, JournalRecord, Storage};
use alloy::primitives::B256;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Append an event to the `ledger_events` journal.
    ///
    /// Returns `(row_id, true)` for a first delivery and `(row_id, false)` when
    /// the same `(chain_id, tx_hash, log_index)` was already journaled.
    pub async fn append_ledger_event(&self, record: &JournalRecord) -> Result<(i64, bool)> {
        let ingested_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events (
                chain_id, event_type, entity_id, payload_json,
                block_number, tx_index, log_index, tx_hash,
                ingested_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(record.chain_id as i64)
        .bind(&record.event_type)
        .bind(&record.entity_id)
        .bind(&record.payload_json)
        .bind(record.coordinates.block_number as i64)
        .bind(record.coordinates.tx_index as i64)
        .bind(record.coordinates.log_index as i64)
        .bind(record.tx_hash.as_slice())
        .bind(ingested_at)
        .execute(&self.pool)
        .await
        .context("Failed to append ledger event")?;

        if result.rows_affected() > 0 {
            return Ok((result.last_insert_rowid(), true));
        }

        // Replays: return the existing row id.
        let id: i64 = sqlx::query_scalar(
            r#"
            SELECT id
            FROM ledger_events
            WHERE chain_id = ?
              AND tx_hash = ?
              AND log_index = ?
            "#,
        )
        .bind(record.chain_id as i64)
        .bind(record.tx_hash.as_slice())
        .bind(record.coordinates.log_index as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch existing ledger event id")?;

        Ok((id, false))
    }

    /// Record how the handler disposed of the first delivery of an event.
    ///
    /// Replays never overwrite an existing outcome. Returns `false` when the
    /// row already had one.
    pub async fn record_ledger_event_outcome(&self, id: i64, outcome: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE ledger_events SET outcome = ? WHERE id = ? AND outcome IS NULL")
                .bind(outcome)
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to record ledger event outcome")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the outcome of a journaled event (reconciliation re-drive).
    pub async fn set_ledger_event_outcome(&self, id: i64, outcome: &str) -> Result<()> {
        sqlx::query("UPDATE ledger_events SET outcome = ? WHERE id = ?")
            .bind(outcome)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to record ledger event outcome")?;

        Ok(())
    }

    /// Journaled events whose outcome is one of `outcomes`, in chain order.
    pub async fn ledger_events_with_outcomes(&self, outcomes: &[&str]) -> Result<Vec<JournalEntry>> {
        if outcomes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; outcomes.len()].join(", ");
        let query = format!(
            r#"
            SELECT id, event_type, payload_json, block_number, tx_index, log_index, tx_hash, outcome
            FROM ledger_events
            WHERE outcome IN ({placeholders})
            ORDER BY block_number ASC, tx_index ASC, log_index ASC
            "#
        );
        let mut statement = sqlx::query(&query);
        for outcome in outcomes {
            statement = statement.bind(*outcome);
        }
        let rows = statement
            .fetch_all(&self.pool)
            .await
            .context("Failed to list ledger events by outcome")?;

        rows.into_iter()
            .map(|row| {
                let tx_hash: Vec<u8> = row.get("tx_hash");
                anyhow::ensure!(tx_hash.len() == 32, "Invalid tx_hash length in ledger_events");
                Ok(JournalEntry {
                    id: row.get("id"),
                    event_type: row.get("event_type"),
                    payload_json: row.get("payload_json"),
                    coordinates: BlockCoordinates::new(
                        row.get::<i64, _>("block_number") as u64,
                        row.get::<i64, _>("tx_index") as u64,
                        row.get::<i64, _>("log_index") as u64,
                    ),
                    tx_hash: B256::from_slice(&tx_hash),
                    outcome: row.get("outcome"),
                })
            })
            .collect()
    }

    /// Journal outcomes for one entity, in chain order.
    pub async fn ledger_event_outcomes(&self, entity_id: &str) -> Result<Vec<(String, Option<String>)>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT event_type, outcome
            FROM ledger_events
            WHERE entity_id = ?
            ORDER BY block_number ASC, tx_index ASC, log_index ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
