//! Per-file subscription records
//!
//! Wraps a [`DocumentStore`] with the subscribe/unsubscribe/update rules.
//! Read-modify-write of one record is serialized through a per-file async
//! mutex; different files never contend. A file's mutex only lives in the
//! lock map while some call holds or waits on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Result, ServiceError};
use crate::schema::{ClientId, FileId, FileRecord};
use crate::socket_server::connection_registry::ConnectionRegistry;
use crate::store::DocumentStore;

type LockMap = Arc<Mutex<HashMap<FileId, Arc<AsyncMutex<()>>>>>;

/// What a subscribe call changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added,
    AlreadySubscribed,
}

pub struct SubscriptionStore {
    store: Arc<dyn DocumentStore>,
    registry: Arc<ConnectionRegistry>,
    file_locks: LockMap,
}

impl SubscriptionStore {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            file_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_file(&self, file_id: &str) -> FileLock {
        let lock = {
            let mut locks = self.file_locks.lock();
            Arc::clone(locks.entry(file_id.to_string()).or_default())
        };
        // The clone taken above keeps the entry alive while we wait
        let guard = Arc::clone(&lock).lock_owned().await;
        FileLock {
            guard: Some(guard),
            lock,
            file_id: file_id.to_string(),
            locks: Arc::clone(&self.file_locks),
        }
    }

    fn ensure_connected(&self, client_id: &str) -> Result<()> {
        if self.registry.is_connected(client_id) {
            Ok(())
        } else {
            Err(ServiceError::NoLiveConnection {
                client_id: client_id.to_string(),
            })
        }
    }

    /// Record `client_id`'s interest in `file_id`.
    ///
    /// The client must hold a live connection when the record is written.
    /// Creates the record at version 0 if needed; subscribing twice is a no-op.
    pub async fn subscribe(&self, file_id: &str, client_id: &str) -> Result<SubscribeOutcome> {
        self.ensure_connected(client_id)?;

        let _lock = self.lock_file(file_id).await;
        // The client may have gone away while we waited for the lock
        self.ensure_connected(client_id)?;

        let mut record = self
            .store
            .load(file_id)?
            .unwrap_or_else(|| FileRecord::new(file_id));

        if !record.add_subscriber(client_id) {
            tracing::debug!("{} already subscribed to {}", client_id, file_id);
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        self.store.save(&record)?;
        tracing::info!("{} subscribed to {}", client_id, file_id);
        Ok(SubscribeOutcome::Added)
    }

    /// Drop `client_id` from `file_id`'s subscribers.
    ///
    /// Returns whether the client was subscribed; removing a non-subscriber
    /// leaves the record untouched.
    pub async fn unsubscribe(&self, file_id: &str, client_id: &str) -> Result<bool> {
        let _lock = self.lock_file(file_id).await;
        let mut record = self.load_existing(file_id)?;

        if !record.remove_subscriber(client_id) {
            tracing::debug!("{} was not subscribed to {}", client_id, file_id);
            return Ok(false);
        }

        self.store.save(&record)?;
        tracing::info!("{} unsubscribed from {}", client_id, file_id);
        Ok(true)
    }

    /// Start a version update for `file_id`.
    ///
    /// The returned [`PendingUpdate`] holds the file lock and the subscriber
    /// snapshot; call [`PendingUpdate::commit`] to persist. Versions are
    /// last-write-wins; a version lower than the stored one is logged.
    pub async fn record_update(&self, file_id: &str, version: u64) -> Result<PendingUpdate> {
        let lock = self.lock_file(file_id).await;
        let mut record = self.load_existing(file_id)?;

        let previous_version = record.set_version(version);
        if version < previous_version {
            tracing::warn!(
                "Non-monotonic update for {}: {} -> {} (last write wins)",
                file_id,
                previous_version,
                version
            );
        }

        Ok(PendingUpdate {
            subscribers: record.subscriber_ids(),
            record,
            previous_version,
            store: Arc::clone(&self.store),
            _lock: lock,
        })
    }

    pub async fn get_subscribers(&self, file_id: &str) -> Result<FileRecord> {
        self.load_existing(file_id)
    }

    fn load_existing(&self, file_id: &str) -> Result<FileRecord> {
        self.store
            .load(file_id)?
            .ok_or_else(|| ServiceError::FileNotFound {
                file_id: file_id.to_string(),
            })
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.file_locks.lock().len()
    }
}

/// Held per-file lock; the map entry is removed on release if nobody else
/// holds or waits on it
struct FileLock {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    file_id: FileId,
    locks: LockMap,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        // Only the map's copy and ours remain
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.file_id);
        }
    }
}

/// A version change that has been applied in memory but not yet persisted
pub struct PendingUpdate {
    record: FileRecord,
    subscribers: Vec<ClientId>,
    previous_version: u64,
    store: Arc<dyn DocumentStore>,
    _lock: FileLock,
}

impl PendingUpdate {
    /// Subscriber snapshot taken when the update started
    pub fn subscribers(&self) -> &[ClientId] {
        &self.subscribers
    }

    /// Version stored before this update
    pub fn previous_version(&self) -> u64 {
        self.previous_version
    }

    /// Persist the updated record and release the file lock
    pub fn commit(self) -> Result<FileRecord> {
        self.store.save(&self.record)?;
        Ok(self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket_server::protocol::ServerMessage;
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        subscriptions: SubscriptionStore,
        _receivers: Vec<mpsc::Receiver<ServerMessage>>,
        registrations: Vec<crate::socket_server::Registration>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let registry = Arc::new(ConnectionRegistry::new());
            let subscriptions = SubscriptionStore::new(store.clone(), registry.clone());
            Self {
                store,
                registry,
                subscriptions,
                _receivers: Vec::new(),
                registrations: Vec::new(),
            }
        }

        fn connect(&mut self, client_id: &str) {
            let (tx, rx) = mpsc::channel(8);
            self.registrations
                .push(self.registry.register(client_id, tx).unwrap());
            self._receivers.push(rx);
        }
    }

    #[tokio::test]
    async fn test_subscribe_requires_live_connection() {
        let fx = Fixture::new();
        let err = fx.subscriptions.subscribe("doc1", "A").await.unwrap_err();
        assert!(matches!(err, ServiceError::NoLiveConnection { .. }));
        assert!(fx.store.load("doc1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_twice_keeps_one_entry() {
        let mut fx = Fixture::new();
        fx.connect("A");

        let first = fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        let second = fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        assert_eq!(first, SubscribeOutcome::Added);
        assert_eq!(second, SubscribeOutcome::AlreadySubscribed);

        let record = fx.subscriptions.get_subscribers("doc1").await.unwrap();
        assert_eq!(record.version, 0);
        assert_eq!(record.subscriber_ids(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_file() {
        let fx = Fixture::new();
        let err = fx.subscriptions.unsubscribe("doc1", "A").await.unwrap_err();
        assert!(matches!(err, ServiceError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_non_member_is_noop() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        let before = fx.store.load("doc1").unwrap();

        let removed = fx.subscriptions.unsubscribe("doc1", "B").await.unwrap();
        assert!(!removed);
        assert_eq!(fx.store.load("doc1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_unsubscribe_does_not_need_connection() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        fx.registrations.clear();

        assert!(fx.subscriptions.unsubscribe("doc1", "A").await.unwrap());
        let record = fx.subscriptions.get_subscribers("doc1").await.unwrap();
        assert!(record.subscribed_clients.is_empty());
    }

    #[tokio::test]
    async fn test_record_update_unknown_file() {
        let fx = Fixture::new();
        let result = fx.subscriptions.record_update("doc1", 3).await;
        assert!(matches!(result, Err(ServiceError::FileNotFound { .. })));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_record_update_commits_version() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();

        let pending = fx.subscriptions.record_update("doc1", 4).await.unwrap();
        assert_eq!(pending.subscribers(), &["A".to_string()]);
        assert_eq!(pending.previous_version(), 0);
        // Not persisted until commit
        assert_eq!(fx.store.load("doc1").unwrap().unwrap().version, 0);

        pending.commit().unwrap();
        assert_eq!(fx.store.load("doc1").unwrap().unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_lower_version_is_last_write_wins() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        fx.subscriptions.record_update("doc1", 9).await.unwrap().commit().unwrap();

        let record = fx.subscriptions.record_update("doc1", 2).await.unwrap().commit().unwrap();
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_pending_update_serializes_same_file() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.connect("B");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        fx.subscriptions.subscribe("doc2", "A").await.unwrap();

        let pending = fx.subscriptions.record_update("doc1", 1).await.unwrap();

        // Other files are not blocked
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            fx.subscriptions.subscribe("doc2", "B"),
        )
        .await;
        assert!(other.is_ok());

        // The same file waits for the pending update
        let same = tokio::time::timeout(
            Duration::from_millis(50),
            fx.subscriptions.subscribe("doc1", "B"),
        )
        .await;
        assert!(same.is_err());

        pending.commit().unwrap();
        fx.subscriptions.subscribe("doc1", "B").await.unwrap();
        let record = fx.subscriptions.get_subscribers("doc1").await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.subscriber_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_save_reports_persistence_failure() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.store.set_fail_saves(true);

        let err = fx.subscriptions.subscribe("doc1", "A").await.unwrap_err();
        assert!(matches!(err, ServiceError::PersistenceFailure { .. }));
    }

    #[tokio::test]
    async fn test_unknown_files_leave_no_lock_entries() {
        let fx = Fixture::new();
        for i in 0..32 {
            let file_id = format!("ghost{}", i);
            assert!(fx.subscriptions.record_update(&file_id, 1).await.is_err());
            assert!(fx.subscriptions.unsubscribe(&file_id, "A").await.is_err());
        }
        assert_eq!(fx.subscriptions.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_released_after_commit() {
        let mut fx = Fixture::new();
        fx.connect("A");
        fx.subscriptions.subscribe("doc1", "A").await.unwrap();
        assert_eq!(fx.subscriptions.lock_count(), 0);

        let pending = fx.subscriptions.record_update("doc1", 1).await.unwrap();
        assert_eq!(fx.subscriptions.lock_count(), 1);
        pending.commit().unwrap();
        assert_eq!(fx.subscriptions.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting_for_lock_rejects_subscribe() {
        let mut fx = Fixture::new();
        fx.connect("A");
        let subscriptions = Arc::new(SubscriptionStore::new(
            fx.store.clone(),
            fx.registry.clone(),
        ));

        let held = subscriptions.lock_file("doc1").await;
        let waiting = {
            let subscriptions = Arc::clone(&subscriptions);
            tokio::spawn(async move { subscriptions.subscribe("doc1", "A").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        fx.registrations.clear();
        drop(held);

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ServiceError::NoLiveConnection { .. }));
        assert!(fx.store.load("doc1").unwrap().is_none());
        assert_eq!(subscriptions.lock_count(), 0);
    }
}
