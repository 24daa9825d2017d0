//! Database query helpers for the Civitas API.

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;

/// Schema shared with the indexer.
pub static MIGRATOR: Migrator = sqlx::migrate!("../indexer/migrations");

/// Benefit projection row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbBenefit {
    /// `0x`-prefixed bytes32 id.
    pub benefit_id: String,
    /// Recipient address (lowercase hex).
    pub recipient_address: String,
    /// Decimal string.
    pub value: String,
    /// `Issued` | `Redeemed` | `Expired`.
    pub status: String,
    /// Unix seconds of the issuing block.
    pub issued_at: i64,
    /// On-chain expiration, unix seconds.
    pub expires_at: i64,
    /// Issuing authority address.
    pub issued_by_address: String,
    /// Unix seconds of the redeeming block, if redeemed.
    pub redeemed_at: Option<i64>,
    /// Redeeming vendor address, if redeemed.
    pub redeemed_by_address: Option<String>,
}

/// User profile row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbUser {
    /// Wallet address as submitted.
    pub wallet_address: String,
    /// Free-form role (e.g. `beneficiary`, `vendor`, `authority`).
    pub role: String,
    /// Display name.
    pub name: Option<String>,
    /// Unix seconds of the first upsert.
    pub created_at: i64,
    /// Unix seconds of the latest upsert.
    pub updated_at: i64,
}

/// Benefits owned by `recipient` (lowercase hex), newest first.
pub async fn get_benefits_by_recipient(
    pool: &SqlitePool,
    recipient: &str,
) -> anyhow::Result<Vec<DbBenefit>> {
    let rows = sqlx::query_as::<_, DbBenefit>(
        r#"
        SELECT
            benefit_id,
            recipient_address,
            value,
            status,
            issued_at,
            expires_at,
            issued_by_address,
            redeemed_at,
            redeemed_by_address
        FROM benefits
        WHERE recipient_address = ?
        ORDER BY issued_at DESC, benefit_id ASC
        "#,
    )
    .bind(recipient)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Benefits redeemed by `vendor` (lowercase hex), most recent redemption first.
pub async fn get_benefits_by_vendor(
    pool: &SqlitePool,
    vendor: &str,
) -> anyhow::Result<Vec<DbBenefit>> {
    let rows = sqlx::query_as::<_, DbBenefit>(
        r#"
        SELECT
            benefit_id,
            recipient_address,
            value,
            status,
            issued_at,
            expires_at,
            issued_by_address,
            redeemed_at,
            redeemed_by_address
        FROM benefits
        WHERE redeemed_by_address = ?
        ORDER BY redeemed_at DESC, benefit_id ASC
        "#,
    )
    .bind(vendor)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert or update a user profile and return the stored row.
///
/// An omitted `name` keeps the stored one.
pub async fn upsert_user(
    pool: &SqlitePool,
    wallet_address: &str,
    role: &str,
    name: Option<&str>,
) -> anyhow::Result<DbUser> {
    let now = chrono::Utc::now().timestamp();

    let user = sqlx::query_as::<_, DbUser>(
        r#"
        INSERT INTO users (wallet_address, role, name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(wallet_address) DO UPDATE SET
            role = excluded.role,
            name = COALESCE(excluded.name, users.name),
            updated_at = excluded.updated_at
        RETURNING wallet_address, role, name, created_at, updated_at
        "#,
    )
    .bind(wallet_address)
    .bind(role)
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(user)
}
