mod common;

use common::{build_engine, checkout, payment_succeeded, received_payment, signed};
use mission_settlement::config::SettlementConfig;
use mission_settlement::domain::dispute::DisputeOutcome;
use mission_settlement::domain::payment::PaymentStatus;
use mission_settlement::domain::ports::PaymentRecordStore;
use mission_settlement::domain::transfer::TransferStatus;
use serde_json::json;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries() {
    let t = build_engine(SettlementConfig::default()).await;
    t.engine.open_checkout(checkout("p1", 10000, true)).await.unwrap();
    let (payload, header) = payment_succeeded("evt_1", "p1", 10000);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = t.engine.clone();
        let payload = payload.clone();
        let header = header.clone();
        handles.push(tokio::spawn(async move {
            engine.handle_processor_event(&payload, &header).await.unwrap()
        }));
    }

    let mut first_deliveries = 0;
    for handle in handles {
        let receipt = handle.await.unwrap();
        assert!(receipt.accepted);
        if !receipt.duplicate {
            first_deliveries += 1;
        }
    }
    assert_eq!(first_deliveries, 1);
    assert_eq!(
        t.engine.get_payment_status("p1").await.unwrap().status,
        PaymentStatus::Received
    );
    assert!(t.store.get_finance("p1").await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_success_events_with_distinct_ids() {
    let t = build_engine(SettlementConfig::default()).await;
    t.engine.open_checkout(checkout("p1", 10000, false)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = t.engine.clone();
        let (payload, header) = signed(json!({
            "id": format!("evt_{}", i),
            "type": if i % 2 == 0 { "checkout.session.completed" } else { "payment_intent.succeeded" },
            "data": {"payment_id": "p1", "reference": format!("ref_{}", i)}
        }));
        handles.push(tokio::spawn(async move {
            engine.handle_processor_event(&payload, &header).await.unwrap()
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().duplicate);
    }

    let finance = t.store.get_finance("p1").await.unwrap().unwrap();
    assert_eq!(finance.gross_amount, 10000);
    assert_eq!(
        t.engine.get_payment_status("p1").await.unwrap().status,
        PaymentStatus::Received
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_releases_plan_transfers_once() {
    let t = build_engine(SettlementConfig::default()).await;
    received_payment(&t, "p1", 10000, true).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = t.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.request_release("p1", "recruiter-1").await
        }));
    }
    for handle in handles {
        // late callers see the payment already distributed
        let _ = handle.await.unwrap();
    }

    assert_eq!(t.store.transfers_for_payment("p1").await.unwrap().len(), 2);
    assert_eq!(t.processor.accepted_transfers().await.len(), 2);
    assert_eq!(
        t.engine.get_payment_status("p1").await.unwrap().status,
        PaymentStatus::Distributed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_racing_reconciliation_moves_money_once() {
    let t = build_engine(SettlementConfig::default()).await;
    for i in 0..6 {
        received_payment(&t, &format!("p{}", i), 10000, true).await;
    }
    t.processor.fail_next("acct_f1", 2).await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = t.engine.clone();
        handles.push(tokio::spawn(async move {
            let _ = engine.request_release(&format!("p{}", i), "recruiter-1").await;
        }));
        let engine = t.engine.clone();
        handles.push(tokio::spawn(async move {
            let _ = engine.reconcile().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    for _ in 0..3 {
        t.engine.reconcile().await.unwrap();
    }

    let accepted = t.processor.accepted_transfers().await;
    let keys: HashSet<_> = accepted.iter().map(|r| r.metadata.transfer_id).collect();
    assert_eq!(keys.len(), accepted.len());

    for i in 0..6 {
        let id = format!("p{}", i);
        let transfers = t.store.transfers_for_payment(&id).await.unwrap();
        assert_eq!(transfers.len(), 2);
        for transfer in &transfers {
            assert!(transfer.attempt_count <= 3);
            assert_eq!(transfer.status, TransferStatus::Created);
        }
        assert_eq!(
            t.engine.get_payment_status(&id).await.unwrap().status,
            PaymentStatus::Distributed
        );
    }
    assert_eq!(accepted.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispute_racing_release_never_distributes_held_payment() {
    for round in 0..10 {
        let t = build_engine(SettlementConfig::default()).await;
        let id = format!("p{}", round);
        received_payment(&t, &id, 10000, false).await;

        let release = {
            let engine = t.engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.request_release(&id, "recruiter-1").await })
        };
        let dispute = {
            let engine = t.engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.report_dispute(&id, "recruiter-1", "late", None).await })
        };
        let _ = release.await.unwrap();
        let dispute = dispute.await.unwrap();

        let status = t.engine.get_payment_status(&id).await.unwrap();
        match dispute {
            Ok(dispute) => {
                assert!(status.has_dispute);
                assert_eq!(status.status, PaymentStatus::Received);

                t.engine
                    .resolve_dispute(dispute.id, "admin-1", DisputeOutcome::Resolved, None)
                    .await
                    .unwrap();
                let report = t.engine.request_release(&id, "recruiter-1").await.unwrap();
                assert!(report.is_settled());
            }
            Err(_) => assert_eq!(status.status, PaymentStatus::Distributed),
        }
        // one payout per payment whatever the interleaving
        assert_eq!(t.processor.accepted_transfers().await.len(), 1);
    }
}
