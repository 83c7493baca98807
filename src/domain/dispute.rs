use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
    Rejected,
}

/// How an administrator closes a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Resolved,
    Rejected,
}

impl From<DisputeOutcome> for DisputeStatus {
    fn from(outcome: DisputeOutcome) -> Self {
        match outcome {
            DisputeOutcome::Resolved => DisputeStatus::Resolved,
            DisputeOutcome::Rejected => DisputeStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDispute {
    pub id: Uuid,
    pub payment_id: String,
    pub reporter_id: String,
    pub reason: String,
    pub description: Option<String>,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolver_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MissionDispute {
    pub fn open(
        payment_id: &str,
        reporter_id: &str,
        reason: &str,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::ValidationError(
                "Dispute reason must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            payment_id: payment_id.to_string(),
            reporter_id: reporter_id.to_string(),
            reason: reason.to_string(),
            description,
            status: DisputeStatus::Open,
            resolution: None,
            resolver_id: None,
            created_at: now,
            resolved_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == DisputeStatus::Open
    }

    /// Closes the dispute. Closing is a one-time act: a closed dispute is never reopened.
    pub fn close(
        &mut self,
        resolver_id: &str,
        outcome: DisputeOutcome,
        resolution: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if !self.is_open() {
            return Err(SettlementError::DisputeAlreadyClosed(self.id));
        }
        self.status = outcome.into();
        self.resolver_id = Some(resolver_id.to_string());
        self.resolution = resolution;
        self.resolved_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_reason() {
        assert!(matches!(
            MissionDispute::open("p1", "r1", "  ", None, Utc::now()),
            Err(SettlementError::ValidationError(_))
        ));
        let dispute = MissionDispute::open("p1", "r1", "work not delivered", None, Utc::now()).unwrap();
        assert!(dispute.is_open());
    }

    #[test]
    fn test_close_is_one_time() {
        let mut dispute = MissionDispute::open("p1", "r1", "late", None, Utc::now()).unwrap();
        dispute
            .close("admin", DisputeOutcome::Rejected, Some("unfounded".to_string()), Utc::now())
            .unwrap();
        assert_eq!(dispute.status, DisputeStatus::Rejected);
        assert_eq!(dispute.resolver_id.as_deref(), Some("admin"));
        assert!(dispute.resolved_at.is_some());

        let err = dispute
            .close("admin", DisputeOutcome::Resolved, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SettlementError::DisputeAlreadyClosed(id) if id == dispute.id));
        assert_eq!(dispute.status, DisputeStatus::Rejected);
    }
}
