use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Bypassed { confidence: f64, threshold: f64 },
    OutsidePolicy { asset: String },
    SourceExcluded { source_id: String, reason: String, timed_out: bool },
    /// Responded but holds no weight in the snapshot used for this decision.
    Unweighted { source_id: String, weight_version: u64 },
    /// Responded with too little confidence to vote.
    BelowVoteThreshold { source_id: String, confidence: f64, threshold: f64 },
    InsufficientRespondents { respondents: usize, required: usize },
    NoConsensus { agreement_fraction: f64, threshold: f64 },
    ConsensusReached { agreement_fraction: f64, weight_version: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn is_exclusion(&self) -> bool {
        matches!(
            self.event,
            AuditEvent::SourceExcluded { .. }
                | AuditEvent::Unweighted { .. }
                | AuditEvent::BelowVoteThreshold { .. }
        )
    }
}
