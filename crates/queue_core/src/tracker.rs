use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::domain::{CounterId, QueueDocument, Ticket, TicketId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// A ticket the counter did not hold in the previous document.
    Called { counter: CounterId, ticket: Ticket },
    /// The held ticket's call time moved forward.
    Recalled { counter: CounterId, ticket: Ticket },
}

impl CallEvent {
    pub fn counter(&self) -> CounterId {
        match self {
            Self::Called { counter, .. } | Self::Recalled { counter, .. } => *counter,
        }
    }

    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Called { ticket, .. } | Self::Recalled { ticket, .. } => ticket,
        }
    }
}

/// Observer-side diff of successive documents, so that a side effect such as
/// an announcement fires once per call rather than once per broadcast.
#[derive(Debug, Default)]
pub struct CallTracker {
    held: BTreeMap<CounterId, (TicketId, Option<DateTime<Utc>>)>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts the calls in `document` as already seen.
    pub fn prime(&mut self, document: &QueueDocument) {
        self.held = held_calls(document)
            .map(|(counter, ticket)| (counter, (ticket.id.clone(), ticket.last_called_at)))
            .collect();
    }

    pub fn observe(&mut self, document: &QueueDocument) -> Vec<CallEvent> {
        let mut events = Vec::new();
        let mut held = BTreeMap::new();

        for (counter, ticket) in held_calls(document) {
            match self.held.get(&counter) {
                Some((seen_id, seen_at)) if *seen_id == ticket.id => {
                    if ticket.last_called_at > *seen_at {
                        events.push(CallEvent::Recalled {
                            counter,
                            ticket: ticket.clone(),
                        });
                    }
                }
                _ => events.push(CallEvent::Called {
                    counter,
                    ticket: ticket.clone(),
                }),
            }
            held.insert(counter, (ticket.id.clone(), ticket.last_called_at));
        }

        self.held = held;
        events
    }
}

fn held_calls(document: &QueueDocument) -> impl Iterator<Item = (CounterId, &Ticket)> + '_ {
    document
        .counters_state
        .keys()
        .filter_map(|counter| document.held_by(*counter).map(|ticket| (*counter, ticket)))
}

#[cfg(test)]
#[path = "tests/tracker_tests.rs"]
mod tests;
