#![allow(dead_code)]

use mission_settlement::application::engine::SettlementEngine;
use mission_settlement::config::SettlementConfig;
use mission_settlement::domain::money::{Amount, Currency};
use mission_settlement::domain::payment::NewPayment;
use mission_settlement::infrastructure::dry_run::DryRunProcessor;
use mission_settlement::infrastructure::in_memory::{InMemoryPayoutDirectory, InMemoryRecordStore};
use mission_settlement::infrastructure::signature::WebhookSigner;
use serde_json::{Value, json};
use std::sync::Arc;

pub const SECRET: &str = "whsec_integration";
pub const SIGNED_AT: i64 = 1_700_000_000;

pub struct TestEngine {
    pub engine: Arc<SettlementEngine>,
    pub store: InMemoryRecordStore,
    pub directory: InMemoryPayoutDirectory,
    pub processor: DryRunProcessor,
}

pub async fn build_engine(config: SettlementConfig) -> TestEngine {
    let store = InMemoryRecordStore::new();
    let directory = InMemoryPayoutDirectory::new();
    directory.register("freelancer-1", "acct_f1", true).await;
    directory.register("commercial-1", "acct_c1", true).await;
    let processor = DryRunProcessor::new(WebhookSigner::new(SECRET, None));
    let engine = SettlementEngine::new(
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        Arc::new(processor.clone()),
        config,
    );
    TestEngine {
        engine: Arc::new(engine),
        store,
        directory,
        processor,
    }
}

pub fn checkout(id: &str, gross: u64, commercial: bool) -> NewPayment {
    NewPayment {
        id: id.to_string(),
        mission_id: format!("mission-{}", id),
        payer_id: "recruiter-1".to_string(),
        freelancer_id: "freelancer-1".to_string(),
        commercial_id: commercial.then(|| "commercial-1".to_string()),
        amount: Amount::new(gross).unwrap(),
        currency: Currency::new("eur").unwrap(),
    }
}

/// Serializes `body` and signs it the way the processor does.
pub fn signed(body: Value) -> (Vec<u8>, String) {
    let payload = serde_json::to_vec(&body).unwrap();
    let header = WebhookSigner::new(SECRET, None).sign(&payload, SIGNED_AT);
    (payload, header)
}

pub fn payment_succeeded(event_id: &str, payment_id: &str, gross: u64) -> (Vec<u8>, String) {
    signed(json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "payment_id": payment_id,
            "reference": format!("cs_{}", payment_id),
            "amount": gross,
            "currency": "eur"
        }
    }))
}

/// Opens a checkout and confirms it, leaving the payment `received`.
pub async fn received_payment(t: &TestEngine, id: &str, gross: u64, commercial: bool) {
    t.engine.open_checkout(checkout(id, gross, commercial)).await.unwrap();
    let (payload, header) = payment_succeeded(&format!("evt_paid_{}", id), id, gross);
    let receipt = t.engine.handle_processor_event(&payload, &header).await.unwrap();
    assert!(receipt.accepted);
}
