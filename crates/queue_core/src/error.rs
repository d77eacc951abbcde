use shared::domain::ServiceType;
use thiserror::Error;

/// Failures a queue command can report. Empty queues, idle counters and
/// counters outside the layout are ordinary outcomes (`None` / `false`),
/// not errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("service {0} is not served by any counter")]
    UnknownService(ServiceType),
    #[error("service {0} has used every ticket number for the day")]
    SequenceExhausted(ServiceType),
    #[error("queue storage failed: {source}")]
    Storage { source: anyhow::Error },
    #[error("failed to encode queue document: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<anyhow::Error> for QueueError {
    fn from(source: anyhow::Error) -> Self {
        Self::Storage { source }
    }
}
