use futures::{future, stream::BoxStream, StreamExt};
use shared::domain::QueueDocument;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::{layout::CounterLayout, migrate::decode};

/// Documents published after each mutation, decoded and migrated. Malformed
/// payloads never reach the consumer.
pub type DocumentStream = BoxStream<'static, QueueDocument>;

/// Unsubscribe token returned by [`crate::QueueStore::subscribe`]. Delivery
/// stops when it is dropped or [`Subscription::unsubscribe`] is called.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn_subscription<F>(
    mut changes: broadcast::Receiver<String>,
    layout: CounterLayout,
    mut handler: F,
) -> Subscription
where
    F: FnMut(QueueDocument) + Send + 'static,
{
    let task = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(raw) => match decode(&raw, &layout) {
                    Some(document) => handler(document),
                    None => debug!("dropping malformed queue broadcast"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "queue subscriber lagged behind broadcasts");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    Subscription { task }
}

pub(crate) fn document_stream(
    changes: broadcast::Receiver<String>,
    layout: CounterLayout,
) -> DocumentStream {
    BroadcastStream::new(changes)
        .filter_map(move |change| {
            let document = match change {
                Ok(raw) => decode(&raw, &layout),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "queue watcher lagged behind broadcasts");
                    None
                }
            };
            future::ready(document)
        })
        .boxed()
}
