use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use civitas_api::server::{build_app, ApiRuntimeConfig};
use civitas_indexer::{
    config::SyncConfig,
    listener::{
        BlockHeader, EventMeta, IndexedEvent, IndexerSupervisor, Ledger, LedgerEvent,
        OnChainBenefit,
    },
    storage::Storage,
    BenefitId,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

/// Chain fixture: a fixed list of logs plus the contract's benefit records.
#[derive(Default)]
struct FixtureLedger {
    events: Mutex<Vec<IndexedEvent>>,
    benefits: Mutex<HashMap<BenefitId, OnChainBenefit>>,
}

impl FixtureLedger {
    fn issue(&self, id: BenefitId, recipient: Address, value: u64, block: u64) {
        self.issue_until(id, recipient, value, U256::from(1_900_000_000u64), block);
    }

    fn issue_until(
        &self,
        id: BenefitId,
        recipient: Address,
        value: u64,
        expiration: U256,
        block: u64,
    ) {
        self.benefits.lock().unwrap().insert(
            id,
            OnChainBenefit {
                recipient,
                value: U256::from(value),
                expiration,
                issuing_authority: authority(),
                status: 0,
            },
        );
        self.push(
            LedgerEvent::BenefitIssued {
                benefit_id: id,
                recipient,
                value: U256::from(value),
                expiration,
            },
            block,
        );
    }

    fn redeem(&self, id: BenefitId, recipient: Address, vendor: Address, block: u64) {
        self.push(
            LedgerEvent::BenefitRedeemed {
                benefit_id: id,
                recipient,
                vendor,
            },
            block,
        );
    }

    fn push(&self, event: LedgerEvent, block: u64) {
        let mut events = self.events.lock().unwrap();
        let log_index = events.len() as u64;
        events.push(IndexedEvent {
            event,
            meta: EventMeta {
                block_number: block,
                tx_index: 0,
                log_index,
                tx_hash: B256::from(U256::from(block * 1_000 + log_index)),
            },
        });
    }
}

#[async_trait]
impl Ledger for FixtureLedger {
    async fn latest_block(&self) -> anyhow::Result<u64> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.meta.block_number)
            .max()
            .unwrap_or(0))
    }

    async fn block_header(&self, number: u64) -> anyhow::Result<BlockHeader> {
        Ok(BlockHeader {
            number,
            hash: B256::from(U256::from(number)),
            timestamp: 1_700_000_000 + number * 12,
        })
    }

    async fn events(&self, from_block: u64, to_block: u64) -> anyhow::Result<Vec<IndexedEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.meta.block_number))
            .cloned()
            .collect())
    }

    async fn benefit_at(
        &self,
        benefit_id: &BenefitId,
        _block: Option<u64>,
    ) -> anyhow::Result<OnChainBenefit> {
        self.benefits
            .lock()
            .unwrap()
            .get(benefit_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown benefit {}", benefit_id))
    }

    async fn redemption_events(
        &self,
        _benefit_id: &BenefitId,
        _from_block: u64,
        _to_block: u64,
    ) -> anyhow::Result<Vec<IndexedEvent>> {
        Ok(Vec::new())
    }
}

fn authority() -> Address {
    Address::repeat_byte(0xa0)
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        start_block: 0,
        poll_interval_secs: 1,
        batch_size: 100,
        confirmations: 0,
    }
}

/// Index `ledger` into a fresh database and build the API over it.
async fn index_and_serve(ledger: FixtureLedger, to_block: u64) -> (Router, TempDir) {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("civitas.db");

    let storage = Storage::new_with_path(&db_path).await.unwrap();
    storage.run_migrations().await.unwrap();
    IndexerSupervisor::new(Arc::new(ledger), storage.clone(), sync_config(), 31337)
        .process_range(1, to_block)
        .await
        .unwrap();
    storage.close().await;

    let url = format!("sqlite://{}", db_path.display());
    let app = build_app(&ApiRuntimeConfig::for_test(url)).await.unwrap();
    (app, temp)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_user(app: &Router, body: &str) -> (StatusCode, serde_json::Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn issued_benefit_is_served_to_recipient() {
    let recipient = Address::repeat_byte(0xaa);
    let id = BenefitId::from([0x01; 32]);

    let ledger = FixtureLedger::default();
    ledger.issue(id, recipient, 100, 2);
    let (app, _temp) = index_and_serve(ledger, 2).await;

    let (status, json) = get(&app, &format!("/benefits/{:#x}", recipient)).await;
    assert_eq!(status, StatusCode::OK);

    let benefits = json.as_array().unwrap();
    assert_eq!(benefits.len(), 1);
    assert_eq!(benefits[0]["benefitId"], id.to_key());
    assert_eq!(benefits[0]["value"], "100");
    assert_eq!(benefits[0]["status"], "Issued");
    assert_eq!(benefits[0]["issuedAt"], "2023-11-14T22:13:44.000Z");
    assert_eq!(benefits[0]["issuedByAddress"], format!("{:#x}", authority()));
    assert!(benefits[0]["redeemedByAddress"].is_null());
}

#[tokio::test]
async fn never_expiring_benefit_is_not_served_as_expired() {
    let recipient = Address::repeat_byte(0xaa);
    let forever = BenefitId::from([0x04; 32]);
    let oversized = BenefitId::from([0x05; 32]);

    let ledger = FixtureLedger::default();
    ledger.issue_until(forever, recipient, 100, U256::from(u64::MAX), 2);
    ledger.issue_until(oversized, recipient, 100, U256::MAX, 2);
    let (app, _temp) = index_and_serve(ledger, 2).await;

    let (status, json) = get(&app, &format!("/benefits/{:#x}", recipient)).await;
    assert_eq!(status, StatusCode::OK);

    let benefits = json.as_array().unwrap();
    assert_eq!(benefits.len(), 2);
    for benefit in benefits {
        assert_eq!(benefit["status"], "Issued");
        assert!(benefit["expiresAt"].is_null(), "got {}", benefit["expiresAt"]);
    }
}

#[tokio::test]
async fn redemption_shows_up_in_vendor_transactions() {
    let recipient = Address::repeat_byte(0xaa);
    let vendor = Address::repeat_byte(0xbb);
    let id = BenefitId::from([0x02; 32]);

    let ledger = FixtureLedger::default();
    ledger.push(LedgerEvent::VendorRegistered { vendor }, 1);
    ledger.issue(id, recipient, 250, 2);
    ledger.redeem(id, recipient, vendor, 3);
    let (app, _temp) = index_and_serve(ledger, 3).await;

    let (status, json) = get(&app, &format!("/transactions/vendor/{:#x}", vendor)).await;
    assert_eq!(status, StatusCode::OK);
    let transactions = json.as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["benefitId"], id.to_key());
    assert_eq!(transactions[0]["status"], "Redeemed");
    assert_eq!(transactions[0]["redeemedByAddress"], format!("{:#x}", vendor));

    let (_, json) = get(&app, &format!("/benefits/{:#x}", recipient)).await;
    assert_eq!(json[0]["status"], "Redeemed");
}

#[tokio::test]
async fn redemption_before_issuance_is_dropped() {
    let recipient = Address::repeat_byte(0xaa);
    let vendor = Address::repeat_byte(0xbb);
    let id = BenefitId::from([0x03; 32]);

    let ledger = FixtureLedger::default();
    ledger.redeem(id, recipient, vendor, 1);
    ledger.issue(id, recipient, 10, 2);
    let (app, _temp) = index_and_serve(ledger, 2).await;

    let (_, json) = get(&app, &format!("/transactions/vendor/{:#x}", vendor)).await;
    assert_eq!(json, serde_json::json!([]));

    let (_, json) = get(&app, &format!("/benefits/{:#x}", recipient)).await;
    assert_eq!(json[0]["status"], "Issued");
}

#[tokio::test]
async fn user_upsert_round_trip() {
    let (app, _temp) = index_and_serve(FixtureLedger::default(), 1).await;

    let (status, json) = post_user(&app, r#"{"role":"vendor"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());

    let (status, json) = post_user(
        &app,
        r#"{"walletAddress":"0xcafe","role":"beneficiary","name":"Grace"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Grace");

    let (status, json) = post_user(&app, r#"{"walletAddress":"0xcafe","role":"vendor"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["walletAddress"], "0xcafe");
    assert_eq!(json["role"], "vendor");
    assert_eq!(json["name"], "Grace");
    assert_eq!(json["createdAt"].as_str().unwrap().len(), 24);
}

#[tokio::test]
async fn service_info_lists_endpoints() {
    let (app, _temp) = index_and_serve(FixtureLedger::default(), 1).await;

    let (status, json) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "Civitas Backend API");
    assert_eq!(json["endpoints"]["users"], "/api/users");
}
