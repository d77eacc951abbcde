pub mod announce;
pub mod clock;
pub mod error;
pub mod feed;
pub mod layout;
pub mod migrate;
pub mod queue;
pub mod tracker;

pub use announce::{announce_detached, Announcement, Announcer, TracingAnnouncer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::QueueError;
pub use feed::{DocumentStream, Subscription};
pub use layout::{CounterLayout, LayoutError};
pub use queue::{QueueStats, QueueStore, DEFAULT_STORAGE_KEY};
pub use tracker::{CallEvent, CallTracker};
