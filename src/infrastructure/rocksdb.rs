use crate::domain::dispute::MissionDispute;
use crate::domain::finance::{FinanceStatus, MissionFinance};
use crate::domain::payment::{MissionPayment, PaymentStatus};
use crate::domain::ports::PaymentRecordStore;
use crate::domain::transfer::{MissionTransfer, TransferStatus};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for payments, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for finance snapshots, keyed by payment id.
pub const CF_FINANCES: &str = "finances";
/// Column Family for transfers, keyed by transfer id.
pub const CF_TRANSFERS: &str = "transfers";
/// Column Family for disputes, keyed by dispute id.
pub const CF_DISPUTES: &str = "disputes";
/// Column Family for processed event ids.
pub const CF_EVENTS: &str = "events";

const COLUMN_FAMILIES: [&str; 5] = [CF_PAYMENTS, CF_FINANCES, CF_TRANSFERS, CF_DISPUTES, CF_EVENTS];

fn internal(message: String) -> SettlementError {
    SettlementError::InternalError(Box::new(std::io::Error::other(message)))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        SettlementError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        SettlementError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

/// A persistent record store using RocksDB.
///
/// Every table lives in its own Column Family with JSON values. RocksDB has no
/// conditional put, so all read-compare-write operations go through
/// `write_guard`; plain reads and unconditional writes do not.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all settlement column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("Column family {} not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        self.db.put_cf(self.cf(cf)?, key, encode(value)?)?;
        Ok(())
    }

    fn exists(&self, cf: &str, key: &[u8]) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key)?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) =
                item.map_err(|e| internal(format!("RocksDB iteration error: {}", e)))?;
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl PaymentRecordStore for RocksDBStore {
    async fn insert_payment(&self, payment: MissionPayment) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self.exists(CF_PAYMENTS, payment.id.as_bytes())? {
            return Err(SettlementError::ValidationError(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        self.write(CF_PAYMENTS, payment.id.as_bytes(), &payment)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<MissionPayment>> {
        self.read(CF_PAYMENTS, payment_id.as_bytes())
    }

    async fn all_payments(&self) -> Result<Vec<MissionPayment>> {
        let mut all: Vec<MissionPayment> = self.scan(CF_PAYMENTS)?;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn update_payment_if(&self, payment: &MissionPayment, expected: PaymentStatus) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let current: MissionPayment = self
            .read(CF_PAYMENTS, payment.id.as_bytes())?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment.id.clone()))?;
        if current.status != expected {
            return Ok(false);
        }
        let mut next = payment.clone();
        next.has_dispute = current.has_dispute;
        self.write(CF_PAYMENTS, next.id.as_bytes(), &next)?;
        Ok(true)
    }

    async fn set_dispute_flag(&self, payment_id: &str, has_dispute: bool) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut payment: MissionPayment = self
            .read(CF_PAYMENTS, payment_id.as_bytes())?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment_id.to_string()))?;
        payment.has_dispute = has_dispute;
        self.write(CF_PAYMENTS, payment_id.as_bytes(), &payment)
    }

    async fn insert_finance_if_absent(&self, finance: MissionFinance) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        if self.exists(CF_FINANCES, finance.payment_id.as_bytes())? {
            return Ok(false);
        }
        self.write(CF_FINANCES, finance.payment_id.as_bytes(), &finance)?;
        Ok(true)
    }

    async fn get_finance(&self, payment_id: &str) -> Result<Option<MissionFinance>> {
        self.read(CF_FINANCES, payment_id.as_bytes())
    }

    async fn set_finance_status(&self, payment_id: &str, status: FinanceStatus) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let finance: Option<MissionFinance> = self.read(CF_FINANCES, payment_id.as_bytes())?;
        if let Some(mut finance) = finance {
            finance.status = status;
            self.write(CF_FINANCES, payment_id.as_bytes(), &finance)?;
        }
        Ok(())
    }

    async fn insert_transfer(&self, transfer: MissionTransfer) -> Result<()> {
        self.write(CF_TRANSFERS, transfer.id.as_bytes(), &transfer)
    }

    async fn update_transfer(&self, transfer: &MissionTransfer) -> Result<()> {
        self.write(CF_TRANSFERS, transfer.id.as_bytes(), transfer)
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<MissionTransfer>> {
        self.read(CF_TRANSFERS, transfer_id.as_bytes())
    }

    async fn transfers_for_payment(&self, payment_id: &str) -> Result<Vec<MissionTransfer>> {
        let mut found: Vec<MissionTransfer> = self
            .scan::<MissionTransfer>(CF_TRANSFERS)?
            .into_iter()
            .filter(|t| t.payment_id == payment_id)
            .collect();
        found.sort_by_key(|t| (t.created_at, t.kind.as_str()));
        Ok(found)
    }

    async fn transfers_with_status(&self, status: TransferStatus) -> Result<Vec<MissionTransfer>> {
        Ok(self
            .scan::<MissionTransfer>(CF_TRANSFERS)?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    async fn find_transfer_by_reference(&self, reference: &str) -> Result<Option<MissionTransfer>> {
        Ok(self
            .scan::<MissionTransfer>(CF_TRANSFERS)?
            .into_iter()
            .find(|t| t.processor_reference.as_deref() == Some(reference)))
    }

    async fn insert_dispute(&self, dispute: MissionDispute) -> Result<()> {
        self.write(CF_DISPUTES, dispute.id.as_bytes(), &dispute)
    }

    async fn update_dispute(&self, dispute: &MissionDispute) -> Result<()> {
        self.write(CF_DISPUTES, dispute.id.as_bytes(), dispute)
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<MissionDispute>> {
        self.read(CF_DISPUTES, dispute_id.as_bytes())
    }

    async fn open_dispute_for(&self, payment_id: &str) -> Result<Option<MissionDispute>> {
        Ok(self
            .scan::<MissionDispute>(CF_DISPUTES)?
            .into_iter()
            .find(|d| d.payment_id == payment_id && d.is_open()))
    }

    async fn claim_event(&self, event_id: &str, event_type: &str) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let cf = self.cf(CF_EVENTS)?;
        if self.db.get_pinned_cf(cf, event_id.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.db.put_cf(cf, event_id.as_bytes(), event_type.as_bytes())?;
        Ok(true)
    }

    async fn release_event(&self, event_id: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        self.db.delete_cf(self.cf(CF_EVENTS)?, event_id.as_bytes())?;
        Ok(())
    }
}
