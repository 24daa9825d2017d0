//! Sync state storage operations.

use super::{Storage, SyncState};
use alloy::primitives::B256;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get the current sync state.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            r#"
            SELECT last_block_number, last_block_hash, updated_at, chain_id
            FROM sync_state
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        let hash_bytes: Vec<u8> = row.get("last_block_hash");
        let last_block_hash = if hash_bytes.len() == 32 {
            B256::from_slice(&hash_bytes)
        } else {
            B256::ZERO
        };

        Ok(SyncState {
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            last_block_hash,
            updated_at: row.get("updated_at"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
        })
    }

    /// Move the cursor to `block_number` once every event up to it has been dispatched.
    pub async fn advance_sync_cursor(&self, block_number: u64, block_hash: B256) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(block_number as i64)
        .bind(block_hash.as_slice())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to advance sync cursor")?;

        Ok(())
    }

    /// Initialize sync state for a new chain.
    pub async fn initialize_sync_state(
        &self,
        chain_id: u64,
        start_block: u64,
        block_hash: B256,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?,
                chain_id = ?
            WHERE id = 1
            "#,
        )
        .bind(start_block as i64)
        .bind(block_hash.as_slice())
        .bind(now)
        .bind(chain_id as i64)
        .execute(&self.pool)
        .await
        .context("Failed to initialize sync state")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use alloy::hex;

    #[tokio::test]
    async fn test_sync_state_operations() {
        let (storage, _temp_db) = setup_storage().await;

        // Initial state is created by the migration
        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 0);
        assert_eq!(state.chain_id, 0);
        assert_eq!(state.last_block_hash, B256::ZERO);

        // Initialize for Sepolia
        let block_hash = B256::from(hex!(
            "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"
        ));
        storage
            .initialize_sync_state(11155111, 1000, block_hash)
            .await
            .unwrap();

        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 1000);
        assert_eq!(state.chain_id, 11155111);
        assert_eq!(state.last_block_hash, block_hash);

        // Advancing keeps the chain id
        let new_hash = B256::repeat_byte(0xab);
        storage.advance_sync_cursor(1001, new_hash).await.unwrap();

        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 1001);
        assert_eq!(state.last_block_hash, new_hash);
        assert_eq!(state.chain_id, 11155111);

        storage.close().await;
    }
}
