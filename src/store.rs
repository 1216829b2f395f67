use crate::types::SessionState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, RwLock};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur at the document store boundary
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The coordination backend is not configured or not reachable. Raised
    /// before any mutation is attempted.
    #[error("coordination backend unavailable: {0}")]
    Unavailable(String),

    #[error("store request failed: {0}")]
    Backend(String),
}

/// Outcome of a transaction closure
#[derive(Debug, Clone)]
pub enum Transaction {
    /// Commit this snapshot as the new document
    Write(SessionState),
    /// Leave the document untouched
    Abort,
}

/// A pure function from the latest committed snapshot (None when the
/// document does not exist) to a transaction outcome. May be re-invoked by
/// the backend on write conflicts, so it must not carry side effects it
/// cannot repeat.
pub type TransactFn<'a> = &'a (dyn Fn(Option<&SessionState>) -> Transaction + Send + Sync);

/// The shared transactional document store every client coordinates through.
///
/// Implementations must provide serializable single-document updates:
/// `transact` is all-or-nothing and retried on conflict, and `subscribe`
/// fires a full snapshot on every committed write, including the caller's
/// own.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the latest committed snapshot, if the document exists
    async fn load(&self, key: &str) -> StoreResult<Option<SessionState>>;

    /// Atomic read-modify-write. Returns the committed snapshot, or None
    /// when the closure aborted.
    async fn transact(&self, key: &str, apply: TransactFn<'_>) -> StoreResult<Option<SessionState>>;

    /// Stream of full snapshots for the given document
    fn subscribe(&self, key: &str) -> broadcast::Receiver<SessionState>;
}

/// In-process store used by tests and as the default backend when no remote
/// store is configured. Updates are serialized per process, so the
/// retry-on-conflict clause of the contract is trivially satisfied.
pub struct MemoryStore {
    documents: RwLock<HashMap<String, SessionState>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<SessionState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, key: &str) -> broadcast::Sender<SessionState> {
        let mut watchers = self.watchers.lock().expect("watcher map poisoned");
        watchers
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, key: &str) -> StoreResult<Option<SessionState>> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn transact(&self, key: &str, apply: TransactFn<'_>) -> StoreResult<Option<SessionState>> {
        let mut documents = self.documents.write().await;
        match apply(documents.get(key)) {
            Transaction::Write(next) => {
                documents.insert(key.to_string(), next.clone());
                drop(documents);

                // Ignore send errors (no subscribers connected is fine)
                let _ = self.sender_for(key).send(next.clone());
                Ok(Some(next))
            }
            Transaction::Abort => Ok(None),
        }
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<SessionState> {
        self.sender_for(key).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Player;

    #[tokio::test]
    async fn test_transact_creates_document_lazily() {
        let store = MemoryStore::new();
        assert!(store.load("room").await.unwrap().is_none());

        let committed = store
            .transact("room", &|snapshot| match snapshot {
                Some(_) => Transaction::Abort,
                None => Transaction::Write(SessionState::initial()),
            })
            .await
            .unwrap();

        assert!(committed.is_some());
        assert_eq!(store.load("room").await.unwrap(), Some(SessionState::initial()));
    }

    #[tokio::test]
    async fn test_abort_leaves_document_untouched() {
        let store = MemoryStore::new();
        store
            .transact("room", &|_| Transaction::Write(SessionState::initial()))
            .await
            .unwrap();

        let committed = store.transact("room", &|_| Transaction::Abort).await.unwrap();
        assert!(committed.is_none());
        assert_eq!(store.load("room").await.unwrap(), Some(SessionState::initial()));
    }

    #[tokio::test]
    async fn test_transact_sees_latest_committed_snapshot() {
        let store = MemoryStore::new();
        store
            .transact("room", &|_| {
                let mut state = SessionState::initial();
                state.players.push(Player::new("a".into(), "Alice"));
                Transaction::Write(state)
            })
            .await
            .unwrap();

        let committed = store
            .transact("room", &|snapshot| {
                let mut state = snapshot.cloned().expect("document should exist");
                state.players.push(Player::new("b".into(), "Bob"));
                Transaction::Write(state)
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(committed.players.len(), 2);
        assert_eq!(committed.host_id().map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_subscribe_receives_every_commit() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("room");

        store
            .transact("room", &|_| Transaction::Write(SessionState::initial()))
            .await
            .unwrap();
        store
            .transact("room", &|snapshot| {
                let mut state = snapshot.cloned().unwrap();
                state.players.push(Player::new("a".into(), "Alice"));
                Transaction::Write(state)
            })
            .await
            .unwrap();
        store.transact("room", &|_| Transaction::Abort).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().players.len(), 0);
        assert_eq!(rx.recv().await.unwrap().players.len(), 1);
        // The abort produced no third snapshot
        assert!(rx.try_recv().is_err());
    }
}
