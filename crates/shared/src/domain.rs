use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DomainError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Highest counter number a layout may name.
pub const MAX_COUNTER_ID: u8 = 99;

/// Service category, written as a single uppercase ASCII letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceType(char);

impl ServiceType {
    pub const REGISTRATION: Self = Self('A');
    pub const INQUIRY: Self = Self('B');

    pub fn new(letter: char) -> Result<Self, DomainError> {
        if letter.is_ascii_uppercase() {
            Ok(Self(letter))
        } else {
            Err(DomainError::InvalidServiceType(letter.to_string()))
        }
    }

    pub fn letter(self) -> char {
        self.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServiceType {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => Self::new(letter.to_ascii_uppercase())
                .map_err(|_| DomainError::InvalidServiceType(raw.to_string())),
            _ => Err(DomainError::InvalidServiceType(raw.to_string())),
        }
    }
}

impl TryFrom<String> for ServiceType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceType> for String {
    fn from(value: ServiceType) -> Self {
        value.0.to_string()
    }
}

/// Physical service counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CounterId(u8);

impl CounterId {
    pub fn new(number: u8) -> Result<Self, DomainError> {
        Self::checked(number).ok_or_else(|| DomainError::InvalidCounter(number.to_string()))
    }

    pub const fn checked(number: u8) -> Option<Self> {
        if number >= 1 && number <= MAX_COUNTER_ID {
            Some(Self(number))
        } else {
            None
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CounterId {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let number = raw
            .trim()
            .parse::<u8>()
            .map_err(|_| DomainError::InvalidCounter(raw.to_string()))?;
        Self::new(number).map_err(|_| DomainError::InvalidCounter(raw.to_string()))
    }
}

impl TryFrom<u8> for CounterId {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CounterId> for u8 {
    fn from(value: CounterId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn new(epoch: NaiveDate, service: ServiceType, sequence: u32) -> Self {
        Self(format!("{}-{service}-{sequence}", epoch.format("%Y-%m-%d")))
    }

    /// Wraps an identifier carried over verbatim from an older document.
    pub fn from_legacy(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Called,
    Served,
    Skipped,
}

pub fn display_code(service: ServiceType, sequence: u32) -> String {
    format!("{service}{sequence:03}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub sequence_number: u32,
    pub service_type: ServiceType,
    pub display_code: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<CounterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_called_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn issue(
        epoch: NaiveDate,
        service: ServiceType,
        sequence: u32,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(epoch, service, sequence),
            sequence_number: sequence,
            service_type: service,
            display_code: display_code(service, sequence),
            status: TicketStatus::Waiting,
            issued_at,
            counter: None,
            last_called_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("counter {counter} holds {ticket}, which is not in the ticket list")]
    HeldTicketMissing { counter: CounterId, ticket: TicketId },
    #[error("counter {counter} holds {ticket}, whose status is {status:?}")]
    HeldTicketNotCalled {
        counter: CounterId,
        ticket: TicketId,
        status: TicketStatus,
    },
    #[error("counter {counter} holds {ticket}, which records counter {recorded:?}")]
    HeldTicketCounterMismatch {
        counter: CounterId,
        ticket: TicketId,
        recorded: Option<CounterId>,
    },
    #[error("service {service} expected sequence {expected}, found {found}")]
    SequenceGap {
        service: ServiceType,
        expected: u32,
        found: u32,
    },
    #[error("service {service} records last sequence {recorded}, tickets end at {actual}")]
    SequenceCounterMismatch {
        service: ServiceType,
        recorded: u32,
        actual: u32,
    },
}

/// The single persisted aggregate shared by every view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub schema_version: u32,
    pub epoch_date: NaiveDate,
    pub tickets: Vec<Ticket>,
    pub counters_state: BTreeMap<CounterId, Option<TicketId>>,
    pub per_service_counters: BTreeMap<ServiceType, u32>,
}

impl QueueDocument {
    pub fn fresh(
        epoch_date: NaiveDate,
        counters: impl IntoIterator<Item = CounterId>,
        services: impl IntoIterator<Item = ServiceType>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            epoch_date,
            tickets: Vec::new(),
            counters_state: counters.into_iter().map(|counter| (counter, None)).collect(),
            per_service_counters: services.into_iter().map(|service| (service, 0)).collect(),
        }
    }

    pub fn ticket(&self, id: &TicketId) -> Option<&Ticket> {
        self.tickets.iter().find(|ticket| &ticket.id == id)
    }

    pub fn ticket_mut(&mut self, id: &TicketId) -> Option<&mut Ticket> {
        self.tickets.iter_mut().find(|ticket| &ticket.id == id)
    }

    pub fn held_by(&self, counter: CounterId) -> Option<&Ticket> {
        self.counters_state
            .get(&counter)
            .and_then(Option::as_ref)
            .and_then(|id| self.ticket(id))
    }

    pub fn last_sequence(&self, service: ServiceType) -> u32 {
        self.per_service_counters
            .get(&service)
            .copied()
            .unwrap_or_default()
    }

    /// Waiting tickets of one service in issuance order.
    pub fn waiting(&self, service: ServiceType) -> impl Iterator<Item = &Ticket> + '_ {
        self.tickets.iter().filter(move |ticket| {
            ticket.service_type == service && ticket.status == TicketStatus::Waiting
        })
    }

    pub fn count_with_status(&self, status: TicketStatus, service: Option<ServiceType>) -> usize {
        self.tickets
            .iter()
            .filter(|ticket| ticket.status == status)
            .filter(|ticket| service.map_or(true, |service| ticket.service_type == service))
            .count()
    }

    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for (counter, held) in &self.counters_state {
            let Some(id) = held else {
                continue;
            };
            let Some(ticket) = self.ticket(id) else {
                violations.push(InvariantViolation::HeldTicketMissing {
                    counter: *counter,
                    ticket: id.clone(),
                });
                continue;
            };
            if ticket.status != TicketStatus::Called {
                violations.push(InvariantViolation::HeldTicketNotCalled {
                    counter: *counter,
                    ticket: id.clone(),
                    status: ticket.status,
                });
            }
            if ticket.counter != Some(*counter) {
                violations.push(InvariantViolation::HeldTicketCounterMismatch {
                    counter: *counter,
                    ticket: id.clone(),
                    recorded: ticket.counter,
                });
            }
        }

        let mut last_seen: BTreeMap<ServiceType, u32> = BTreeMap::new();
        for ticket in &self.tickets {
            let last = last_seen.entry(ticket.service_type).or_default();
            if ticket.sequence_number != *last + 1 {
                violations.push(InvariantViolation::SequenceGap {
                    service: ticket.service_type,
                    expected: *last + 1,
                    found: ticket.sequence_number,
                });
            }
            *last = ticket.sequence_number;
        }
        for (service, recorded) in &self.per_service_counters {
            let actual = last_seen.get(service).copied().unwrap_or_default();
            if *recorded != actual {
                violations.push(InvariantViolation::SequenceCounterMismatch {
                    service: *service,
                    recorded: *recorded,
                    actual,
                });
            }
        }
        for (service, actual) in &last_seen {
            if !self.per_service_counters.contains_key(service) {
                violations.push(InvariantViolation::SequenceCounterMismatch {
                    service: *service,
                    recorded: 0,
                    actual: *actual,
                });
            }
        }

        violations
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
