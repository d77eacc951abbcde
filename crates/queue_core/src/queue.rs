use std::sync::Arc;

use serde::Serialize;
use shared::domain::{CounterId, QueueDocument, ServiceType, Ticket, TicketStatus};
use storage::BlobStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::QueueError,
    feed::{document_stream, spawn_subscription, DocumentStream, Subscription},
    layout::CounterLayout,
    migrate::{fresh_document, load_or_fresh},
};

pub const DEFAULT_STORAGE_KEY: &str = "queue_state";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub issued: usize,
    pub waiting: usize,
    pub called: usize,
    pub served: usize,
    pub skipped: usize,
}

impl QueueStats {
    pub fn from_document(document: &QueueDocument, service: Option<ServiceType>) -> Self {
        let mut stats = Self::default();
        let tickets = document
            .tickets
            .iter()
            .filter(|ticket| service.map_or(true, |service| ticket.service_type == service));
        for ticket in tickets {
            stats.issued += 1;
            match ticket.status {
                TicketStatus::Waiting => stats.waiting += 1,
                TicketStatus::Called => stats.called += 1,
                TicketStatus::Served => stats.served += 1,
                TicketStatus::Skipped => stats.skipped += 1,
            }
        }
        stats
    }
}

/// Sole owner of the persisted queue document.
///
/// Every command loads the latest document (rolling the epoch over when the
/// local date changed), applies one transition, writes the whole document
/// back and thereby notifies every subscriber sharing the blob store.
/// Commands issued through one store run one at a time; separate stores
/// over the same blob store race with last-writer-wins semantics.
pub struct QueueStore {
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    layout: CounterLayout,
    key: String,
    commands: Mutex<()>,
}

impl QueueStore {
    pub fn new(blobs: Arc<dyn BlobStore>, layout: CounterLayout) -> Self {
        Self {
            blobs,
            clock: Arc::new(SystemClock),
            layout,
            key: DEFAULT_STORAGE_KEY.to_string(),
            commands: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn layout(&self) -> &CounterLayout {
        &self.layout
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn issue_ticket(&self, service: ServiceType) -> Result<Ticket, QueueError> {
        if !self.layout.contains_service(service) {
            return Err(QueueError::UnknownService(service));
        }
        let _command = self.commands.lock().await;
        let mut document = self.load().await?;

        let Some(sequence) = document.last_sequence(service).checked_add(1) else {
            return Err(QueueError::SequenceExhausted(service));
        };
        let ticket = Ticket::issue(document.epoch_date, service, sequence, self.clock.now());
        document.tickets.push(ticket.clone());
        document.per_service_counters.insert(service, sequence);

        self.persist(&document).await?;
        info!(ticket = %ticket.display_code, %service, "ticket issued");
        Ok(ticket)
    }

    /// Calls the oldest waiting ticket of the counter's service. `None` when
    /// the counter is outside the layout or nothing is waiting.
    pub async fn call_next(&self, counter: CounterId) -> Result<Option<Ticket>, QueueError> {
        let Some(service) = self.layout.service_for(counter) else {
            warn!(%counter, "call requested for counter outside layout");
            return Ok(None);
        };
        let _command = self.commands.lock().await;
        let mut document = self.load().await?;

        let Some(id) = document.waiting(service).next().map(|ticket| ticket.id.clone()) else {
            debug!(%counter, %service, "no waiting tickets");
            return Ok(None);
        };
        let now = self.clock.now();
        let Some(ticket) = document.ticket_mut(&id) else {
            return Ok(None);
        };
        ticket.status = TicketStatus::Called;
        ticket.counter = Some(counter);
        ticket.last_called_at = Some(now);
        let called = ticket.clone();
        let previous = document.counters_state.insert(counter, Some(id)).flatten();

        self.persist(&document).await?;
        info!(
            ticket = %called.display_code,
            %counter,
            replaced = ?previous.as_ref().map(|id| id.as_str()),
            "ticket called"
        );
        Ok(Some(called))
    }

    /// Refreshes the call time of the ticket the counter holds.
    pub async fn recall_current(&self, counter: CounterId) -> Result<Option<Ticket>, QueueError> {
        if !self.layout.contains_counter(counter) {
            return Ok(None);
        }
        let _command = self.commands.lock().await;
        let mut document = self.load().await?;

        let Some(id) = document.counters_state.get(&counter).cloned().flatten() else {
            return Ok(None);
        };
        let now = self.clock.now();
        let Some(ticket) = document.ticket_mut(&id) else {
            return Ok(None);
        };
        ticket.last_called_at = Some(now);
        let recalled = ticket.clone();

        self.persist(&document).await?;
        info!(ticket = %recalled.display_code, %counter, "ticket recalled");
        Ok(Some(recalled))
    }

    pub async fn skip_current(&self, counter: CounterId) -> Result<bool, QueueError> {
        self.complete_current(counter, TicketStatus::Skipped).await
    }

    pub async fn mark_served(&self, counter: CounterId) -> Result<bool, QueueError> {
        self.complete_current(counter, TicketStatus::Served).await
    }

    /// Discards every ticket and call of the current day.
    pub async fn reset_queue(&self) -> Result<(), QueueError> {
        let _command = self.commands.lock().await;
        let document = fresh_document(&self.layout, self.clock.today());
        self.persist(&document).await?;
        warn!(epoch = %document.epoch_date, "queue reset by operator");
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<QueueDocument, QueueError> {
        self.load().await
    }

    pub async fn waiting_count(&self, service: Option<ServiceType>) -> Result<usize, QueueError> {
        let document = self.load().await?;
        Ok(document.count_with_status(TicketStatus::Waiting, service))
    }

    /// Waiting tickets of one service, next to be called first.
    pub async fn waiting_tickets(&self, service: ServiceType) -> Result<Vec<Ticket>, QueueError> {
        let document = self.load().await?;
        Ok(document.waiting(service).cloned().collect())
    }

    pub async fn current_for(&self, counter: CounterId) -> Result<Option<Ticket>, QueueError> {
        let document = self.load().await?;
        Ok(document.held_by(counter).cloned())
    }

    /// Tickets currently held, by counter.
    pub async fn current_calls(&self) -> Result<Vec<(CounterId, Ticket)>, QueueError> {
        let document = self.load().await?;
        Ok(document
            .counters_state
            .keys()
            .filter_map(|counter| {
                document
                    .held_by(*counter)
                    .map(|ticket| (*counter, ticket.clone()))
            })
            .collect())
    }

    pub async fn stats(&self, service: Option<ServiceType>) -> Result<QueueStats, QueueError> {
        let document = self.load().await?;
        Ok(QueueStats::from_document(&document, service))
    }

    /// Registers `handler` for every document written under this store's key
    /// by any store sharing the blob store, this one included.
    ///
    /// # Panics
    ///
    /// Delivery runs on a spawned task, so this must be called from within a
    /// Tokio runtime.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(QueueDocument) + Send + 'static,
    {
        spawn_subscription(self.blobs.watch(&self.key), self.layout.clone(), handler)
    }

    pub fn watch(&self) -> DocumentStream {
        document_stream(self.blobs.watch(&self.key), self.layout.clone())
    }

    async fn complete_current(
        &self,
        counter: CounterId,
        outcome: TicketStatus,
    ) -> Result<bool, QueueError> {
        if !self.layout.contains_counter(counter) {
            return Ok(false);
        }
        let _command = self.commands.lock().await;
        let mut document = self.load().await?;

        let Some(id) = document.counters_state.get(&counter).cloned().flatten() else {
            return Ok(false);
        };
        let display_code = match document.ticket_mut(&id) {
            Some(ticket) => {
                ticket.status = outcome;
                ticket.display_code.clone()
            }
            None => id.to_string(),
        };
        document.counters_state.insert(counter, None);

        self.persist(&document).await?;
        info!(ticket = %display_code, %counter, ?outcome, "ticket completed");
        Ok(true)
    }

    async fn load(&self) -> Result<QueueDocument, QueueError> {
        let raw = self.blobs.load(&self.key).await?;
        Ok(load_or_fresh(raw.as_deref(), &self.layout, self.clock.today()))
    }

    async fn persist(&self, document: &QueueDocument) -> Result<(), QueueError> {
        let raw = serde_json::to_string(document)?;
        self.blobs.save(&self.key, &raw).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/queue_tests.rs"]
mod tests;
