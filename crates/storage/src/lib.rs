use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

const FEED_CAPACITY: usize = 64;

/// Keyed blob persistence with a change feed per key.
///
/// `save` publishes the written value to every receiver obtained from
/// `watch` for the same key, including receivers owned by the writer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
    fn watch(&self, key: &str) -> broadcast::Receiver<String>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        (**self).save(key, value).await
    }

    fn watch(&self, key: &str) -> broadcast::Receiver<String> {
        (**self).watch(key)
    }
}

/// In-process fan-out of written values, one broadcast channel per key.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    senders: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl ChangeFeed {
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<String> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    /// Keys nobody has watched yet are skipped.
    pub fn publish(&self, key: &str, value: &str) {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = senders.get(key) {
            // No live receivers is not a failure.
            let _ = sender.send(value.to_string());
        }
    }

    fn watched_keys(&self) -> Vec<String> {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .iter()
            .filter(|(_, sender)| sender.receiver_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub value: String,
    pub revision: i64,
}

/// SQLite-backed blob store. Clones share the pool and the change feed.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    feed: ChangeFeed,
    seen_revisions: Arc<Mutex<HashMap<String, i64>>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            feed: ChangeFeed::default(),
            seen_revisions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn fetch_blob(&self, key: &str) -> Result<Option<StoredBlob>> {
        let row = sqlx::query("SELECT value, revision FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read blob '{key}'"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(StoredBlob {
            value: row.try_get("value")?,
            revision: row.try_get("revision")?,
        }))
    }

    /// Polls watched keys and republishes values written by other processes
    /// sharing the same database file. Must be called within a Tokio runtime.
    pub fn spawn_change_poller(&self, interval: Duration) -> JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for key in storage.feed.watched_keys() {
                    if let Err(error) = storage.poll_key(&key).await {
                        warn!(%key, %error, "blob change poll failed");
                    }
                }
            }
        })
    }

    async fn poll_key(&self, key: &str) -> Result<()> {
        let Some(blob) = self.fetch_blob(key).await? else {
            self.record_revision(key, 0);
            return Ok(());
        };
        let previous = self.record_revision(key, blob.revision);
        match previous {
            Some(previous) if previous < blob.revision => {
                debug!(%key, revision = blob.revision, "external blob change");
                self.feed.publish(key, &blob.value);
            }
            _ => {}
        }
        Ok(())
    }

    /// Stores `revision` as the latest seen for `key` and returns what was
    /// recorded before. Never moves a key's revision backwards.
    fn record_revision(&self, key: &str, revision: i64) -> Option<i64> {
        let mut seen = self
            .seen_revisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = seen.get(key).copied();
        if previous.map_or(true, |previous| previous < revision) {
            seen.insert(key.to_string(), revision);
        }
        previous
    }
}

#[async_trait]
impl BlobStore for Storage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.fetch_blob(key).await?.map(|blob| blob.value))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        let revision: i64 = sqlx::query_scalar(
            "INSERT INTO blobs (key, value, revision, updated_at) VALUES (?, ?, 1, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, revision = blobs.revision + 1, updated_at = CURRENT_TIMESTAMP
             RETURNING revision",
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to write blob '{key}'"))?;
        self.record_revision(key, revision);
        self.feed.publish(key, value);
        Ok(())
    }

    fn watch(&self, key: &str) -> broadcast::Receiver<String> {
        self.feed.subscribe(key)
    }
}

/// Process-local blob store; clones observe one another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, String>>>,
    feed: ChangeFeed,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a blob without notifying watchers.
    pub fn put_silently(&self, key: &str, value: &str) {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.put_silently(key, value);
        self.feed.publish(key, value);
        Ok(())
    }

    fn watch(&self, key: &str) -> broadcast::Receiver<String> {
        self.feed.subscribe(key)
    }
}

pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
