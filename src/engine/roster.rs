use super::{EngineResult, GameEngine};
use crate::store::Transaction;
use crate::types::{Player, SessionState};

impl GameEngine {
    /// Join the shared session under the local identity.
    ///
    /// Idempotent: rejoining with the same identity only updates the display
    /// name, never duplicates the roster entry. The first client to observe
    /// a missing document creates it here.
    pub async fn join(&self, name: &str) -> EngineResult<()> {
        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| match snapshot {
                None => {
                    let mut state = SessionState::initial();
                    state.players.push(Player::new(self.local_id().clone(), name));
                    Transaction::Write(state)
                }
                Some(state) => {
                    let mut state = state.clone();
                    match state.find_player_mut(self.local_id()) {
                        Some(player) => player.name = name.to_string(),
                        None => state.players.push(Player::new(self.local_id().clone(), name)),
                    }
                    Transaction::Write(state)
                }
            })
            .await?;

        if let Some(state) = committed {
            tracing::info!(
                "Player {} joined as {:?} ({} in roster)",
                self.local_id(),
                name,
                state.players.len()
            );
        }
        Ok(())
    }

    /// Destructive reset: replace the whole document with the pristine
    /// initial state, wiping the roster. Every connected client falls back
    /// to the lobby and has to join again.
    pub async fn hard_reset(&self) -> EngineResult<()> {
        self.store()
            .transact(self.session_key(), &|_| {
                Transaction::Write(SessionState::initial())
            })
            .await?;

        tracing::info!("Session hard reset by {}", self.local_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testutil::*;
    use crate::store::{MemoryStore, SessionStore};
    use crate::types::Phase;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_creates_document_lazily() {
        let store = Arc::new(MemoryStore::new());
        let alice = engine_for(&store, "alice");

        assert!(store.load(alice.session_key()).await.unwrap().is_none());
        alice.join("Alice").await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Lobby);
        assert_eq!(state.players.len(), 1);
        assert_eq!(state.players[0].score, 0);
    }

    #[tokio::test]
    async fn test_rejoin_renames_in_place() {
        let store = Arc::new(MemoryStore::new());
        let alice = engine_for(&store, "alice");
        let bob = engine_for(&store, "bob");

        alice.join("Alice").await.unwrap();
        bob.join("Bob").await.unwrap();
        alice.join("Alice2").await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.players[0].name, "Alice2");
        // Join order, and therefore the host, is unchanged
        assert_eq!(state.host_id().map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_hard_reset_wipes_roster() {
        let store = Arc::new(MemoryStore::new());
        let alice = engine_for(&store, "alice");
        let bob = engine_for(&store, "bob");

        alice.join("Alice").await.unwrap();
        bob.join("Bob").await.unwrap();
        bob.hard_reset().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert!(state.players.is_empty());
        assert_eq!(state.phase, Phase::Lobby);
    }
}
