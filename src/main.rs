use clap::Parser;
use miette::{IntoDiagnostic, Result};
use mission_settlement::application::engine::SettlementEngine;
use mission_settlement::config::{DEFAULT_MAX_TRANSFER_ATTEMPTS, SettlementConfig};
use mission_settlement::domain::ports::RecordStoreRef;
use mission_settlement::error::SettlementError;
use mission_settlement::infrastructure::dry_run::DryRunProcessor;
use mission_settlement::infrastructure::in_memory::{InMemoryPayoutDirectory, InMemoryRecordStore};
use mission_settlement::infrastructure::signature::WebhookSigner;
use mission_settlement::interfaces::csv::payment_writer::PaymentWriter;
use mission_settlement::interfaces::script::script_reader::{ScriptOp, ScriptReader};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Operator script, one JSON operation per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Shared secret used to verify processor webhook signatures
    #[arg(long, env = "SETTLEMENT_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Maximum age of a webhook signature in seconds; 0 disables the check
    #[arg(long, default_value_t = 300)]
    signature_tolerance_secs: u64,

    /// Transfer attempts before a payment is escalated to errored
    #[arg(long, default_value_t = DEFAULT_MAX_TRANSFER_ATTEMPTS)]
    max_transfer_attempts: u32,

    /// Upper bound on a single processor transfer call, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    transfer_timeout_ms: u64,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<RecordStoreRef> {
    use mission_settlement::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path)?)),
        None => Ok(Arc::new(InMemoryRecordStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<RecordStoreRef> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(Arc::new(InMemoryRecordStore::new()))
}

async fn run_operation(
    engine: &SettlementEngine,
    directory: &InMemoryPayoutDirectory,
    processor: &DryRunProcessor,
    op: ScriptOp,
) -> mission_settlement::error::Result<()> {
    match op {
        ScriptOp::Checkout(new_payment) => {
            engine.open_checkout(new_payment).await?;
        }
        ScriptOp::PayoutAccount {
            participant_id,
            account_id,
            payouts_enabled,
        } => {
            directory
                .register(&participant_id, &account_id, payouts_enabled)
                .await;
        }
        ScriptOp::Webhook { payload, signature } => {
            let receipt = engine
                .handle_processor_event(payload.as_bytes(), &signature)
                .await?;
            if receipt.duplicate {
                info!("Webhook was a duplicate delivery");
            } else if !receipt.accepted {
                warn!("Webhook acknowledged but refused by the settlement engine");
            }
        }
        ScriptOp::Release {
            payment_id,
            requested_by,
        } => {
            let report = engine.request_release(&payment_id, &requested_by).await?;
            let failed = report.failed_transfers().count();
            if failed > 0 {
                warn!(payment_id = %payment_id, failed, "Release left failed transfers for reconciliation");
            }
        }
        ScriptOp::Dispute {
            payment_id,
            reporter_id,
            reason,
            description,
        } => {
            engine
                .report_dispute(&payment_id, &reporter_id, &reason, description)
                .await?;
        }
        ScriptOp::Resolve {
            payment_id,
            resolver_id,
            outcome,
            resolution,
        } => {
            let dispute = engine.open_dispute_for(&payment_id).await?.ok_or_else(|| {
                SettlementError::ValidationError(format!(
                    "Payment {} has no open dispute",
                    payment_id
                ))
            })?;
            engine
                .resolve_dispute(dispute.id, &resolver_id, outcome, resolution)
                .await?;
        }
        ScriptOp::Reconcile => {
            engine.reconcile().await?;
        }
        ScriptOp::ProcessorOutage {
            account_id,
            failures,
        } => {
            processor.fail_next(&account_id, failures).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let secret = match cli.webhook_secret {
        Some(secret) => secret,
        None => {
            warn!("No webhook secret configured; every webhook will be rejected");
            uuid::Uuid::new_v4().to_string()
        }
    };
    let tolerance = (cli.signature_tolerance_secs > 0)
        .then(|| Duration::from_secs(cli.signature_tolerance_secs));
    let config = SettlementConfig {
        max_transfer_attempts: cli.max_transfer_attempts,
        transfer_timeout: Duration::from_millis(cli.transfer_timeout_ms),
        ..SettlementConfig::default()
    };

    let store = open_store(cli.db_path)?;
    let directory = InMemoryPayoutDirectory::new();
    let processor = DryRunProcessor::new(WebhookSigner::new(secret, tolerance));
    let engine = SettlementEngine::new(
        store,
        Arc::new(directory.clone()),
        Arc::new(processor.clone()),
        config,
    );

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = ScriptReader::new(BufReader::new(file));
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = run_operation(&engine, &directory, &processor, op).await {
                    error!(error = %e, "Error running operation");
                }
            }
            Err(e) => {
                error!(error = %e, "Error reading operation");
            }
        }
    }

    let payments = engine.into_results().await?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments)?;

    Ok(())
}
