//! Shapes a stored queue blob can take. The current document is tried first;
//! the two older layouts predate service partitioning and are only ever read.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{QueueDocument, TicketStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTicket {
    pub id: String,
    pub number: u32,
    #[serde(default)]
    pub formatted_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: TicketStatus,
    #[serde(default)]
    pub loket: Option<u8>,
    #[serde(default)]
    pub called_at: Option<DateTime<Utc>>,
}

/// Per-counter layout: `calledByLoket` maps counter numbers to a copy of the
/// ticket it holds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPerCounterState {
    pub tickets: Vec<LegacyTicket>,
    pub current_number: u32,
    pub last_reset: NaiveDate,
    pub called_by_loket: BTreeMap<String, Option<LegacyTicket>>,
}

/// Oldest layout: one queue-wide `currentCalled` ticket.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySingleCallState {
    pub tickets: Vec<LegacyTicket>,
    pub current_number: u32,
    pub last_reset: NaiveDate,
    #[serde(default)]
    pub current_called: Option<LegacyTicket>,
}

#[derive(Debug, Clone)]
pub enum StoredDocument {
    Current(QueueDocument),
    PerCounter(LegacyPerCounterState),
    SingleCall(LegacySingleCallState),
}

impl StoredDocument {
    /// Dispatches on marker fields rather than `#[serde(untagged)]`, which
    /// buffers content and loses the numeric map keys of `counters_state`.
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("schema_version").is_some() {
            return serde_json::from_value(value).map(Self::Current);
        }
        if value.get("calledByLoket").is_some() {
            return serde_json::from_value(value).map(Self::PerCounter);
        }
        serde_json::from_value(value).map(Self::SingleCall)
    }
}
