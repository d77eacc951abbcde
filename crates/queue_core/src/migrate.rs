//! Turning a stored blob back into a [`QueueDocument`].
//!
//! Nothing here fails: unreadable blobs decode to `None` and the caller starts
//! a fresh day, older layouts are migrated, and inconsistent counter slots are
//! cleared.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use shared::{
    domain::{
        display_code, CounterId, QueueDocument, ServiceType, Ticket, TicketId, TicketStatus,
    },
    protocol::{LegacyPerCounterState, LegacySingleCallState, LegacyTicket, StoredDocument},
};
use tracing::{debug, info, warn};

use crate::layout::CounterLayout;

/// Document a view should act on: the stored one when it belongs to `today`,
/// otherwise an empty document for `today`.
pub fn load_or_fresh(raw: Option<&str>, layout: &CounterLayout, today: NaiveDate) -> QueueDocument {
    let Some(document) = raw.and_then(|raw| decode(raw, layout)) else {
        return fresh_document(layout, today);
    };
    if document.epoch_date != today {
        info!(
            stored = %document.epoch_date,
            %today,
            discarded_tickets = document.tickets.len(),
            "queue epoch rolled over"
        );
        return fresh_document(layout, today);
    }
    document
}

pub fn fresh_document(layout: &CounterLayout, today: NaiveDate) -> QueueDocument {
    QueueDocument::fresh(today, layout.counters(), layout.services())
}

/// Parses, migrates and repairs a stored or broadcast blob. `None` means the
/// payload is not a queue document in any known layout.
pub fn decode(raw: &str, layout: &CounterLayout) -> Option<QueueDocument> {
    let stored = match StoredDocument::parse(raw) {
        Ok(stored) => stored,
        Err(error) => {
            debug!(%error, "ignoring unreadable queue blob");
            return None;
        }
    };
    let mut document = match stored {
        StoredDocument::Current(document) => document,
        StoredDocument::PerCounter(legacy) => migrate_per_counter(legacy, layout),
        StoredDocument::SingleCall(legacy) => migrate_single_call(legacy, layout),
    };
    align_with_layout(&mut document, layout);
    repair(&mut document);
    Some(document)
}

fn migrate_per_counter(legacy: LegacyPerCounterState, layout: &CounterLayout) -> QueueDocument {
    info!(
        tickets = legacy.tickets.len(),
        "migrating per-counter queue document"
    );
    let mut document = migrated_base(legacy.tickets, legacy.current_number, legacy.last_reset, layout);
    for (key, held) in legacy.called_by_loket {
        let Some(held) = held else {
            continue;
        };
        match key.parse::<CounterId>() {
            Ok(counter) => adopt_held_ticket(&mut document, counter, &held, layout),
            Err(error) => debug!(%key, %error, "dropping legacy counter slot"),
        }
    }
    document
}

fn migrate_single_call(legacy: LegacySingleCallState, layout: &CounterLayout) -> QueueDocument {
    info!(
        tickets = legacy.tickets.len(),
        "migrating single-call queue document"
    );
    let mut document = migrated_base(legacy.tickets, legacy.current_number, legacy.last_reset, layout);
    if let Some(held) = legacy.current_called {
        let counter = held
            .loket
            .and_then(CounterId::checked)
            .or(CounterId::checked(1));
        if let Some(counter) = counter {
            adopt_held_ticket(&mut document, counter, &held, layout);
        }
    }
    document
}

/// Legacy documents had one numbering sequence; it becomes the default
/// service's sequence.
fn migrated_base(
    tickets: Vec<LegacyTicket>,
    current_number: u32,
    epoch_date: NaiveDate,
    layout: &CounterLayout,
) -> QueueDocument {
    let service = layout.default_service();
    let mut document = fresh_document(layout, epoch_date);
    document.tickets = tickets
        .into_iter()
        .map(|legacy| Ticket {
            id: TicketId::from_legacy(legacy.id),
            sequence_number: legacy.number,
            service_type: service,
            display_code: display_code(service, legacy.number),
            status: legacy.status,
            issued_at: legacy.created_at,
            counter: legacy.loket.and_then(CounterId::checked),
            last_called_at: legacy.called_at,
        })
        .collect();
    document.per_service_counters.insert(service, current_number);
    document
}

fn adopt_held_ticket(
    document: &mut QueueDocument,
    counter: CounterId,
    held: &LegacyTicket,
    layout: &CounterLayout,
) {
    if layout.service_for(counter) != Some(layout.default_service()) {
        // The ticket stays `called` but no counter holds it.
        debug!(%counter, ticket = %held.id, "dropping legacy slot for counter of another service");
        return;
    }
    let id = TicketId::from_legacy(held.id.clone());
    let Some(ticket) = document.ticket_mut(&id) else {
        debug!(%counter, ticket = %held.id, "dropping legacy slot for unknown ticket");
        return;
    };
    if ticket.status != TicketStatus::Called {
        return;
    }
    ticket.counter = Some(counter);
    // The slot copy was the one refreshed on recall.
    ticket.last_called_at = ticket.last_called_at.max(held.called_at);
    document.counters_state.insert(counter, Some(id));
}

/// Gives every configured counter and service an entry and drops slots for
/// counters the layout no longer names.
fn align_with_layout(document: &mut QueueDocument, layout: &CounterLayout) {
    document.counters_state.retain(|counter, held| {
        let keep = layout.contains_counter(*counter);
        if !keep {
            warn!(%counter, held = ?held, "dropping slot for counter outside layout");
        }
        keep
    });
    for counter in layout.counters() {
        document.counters_state.entry(counter).or_insert(None);
    }
    for service in layout.services() {
        document.per_service_counters.entry(service).or_insert(0);
    }
}

fn repair(document: &mut QueueDocument) {
    let slots: Vec<(CounterId, TicketId)> = document
        .counters_state
        .iter()
        .filter_map(|(counter, held)| held.clone().map(|id| (*counter, id)))
        .collect();
    for (counter, id) in slots {
        let consistent = document.ticket(&id).is_some_and(|ticket| {
            ticket.status == TicketStatus::Called && ticket.counter == Some(counter)
        });
        if !consistent {
            warn!(%counter, ticket = %id, "clearing counter slot that disagrees with its ticket");
            document.counters_state.insert(counter, None);
        }
    }

    // Each service counter equals its highest issued ticket, so numbering
    // neither reuses a taken number nor jumps past a stored bogus value.
    let mut highest: BTreeMap<ServiceType, u32> = document
        .per_service_counters
        .keys()
        .map(|service| (*service, 0))
        .collect();
    for ticket in &document.tickets {
        let seen = highest.entry(ticket.service_type).or_insert(0);
        *seen = (*seen).max(ticket.sequence_number);
    }
    for (service, actual) in highest {
        let recorded = document.per_service_counters.insert(service, actual);
        if recorded.is_some_and(|recorded| recorded != actual) {
            warn!(
                %service,
                recorded = ?recorded,
                actual,
                "resetting service counter to the highest issued ticket"
            );
        }
    }
}

#[cfg(test)]
#[path = "tests/migrate_tests.rs"]
mod tests;
