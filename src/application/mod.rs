//! Application layer orchestrating the settlement workflow.
//!
//! `SettlementEngine` is the entry point. It owns the payment state machine,
//! the webhook gate, the dispute controller and the reconciliation driver, and
//! serializes work per payment through a shared lock registry.

pub mod disputes;
pub mod engine;
pub mod ingestion;
pub mod locks;
pub mod reconciliation;
pub mod settlement;
