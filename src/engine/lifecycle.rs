use super::{EngineError, EngineResult, GameEngine};
use crate::catalog::fallback_questions;
use crate::store::Transaction;
use crate::types::{
    GameMode, Phase, Question, MIN_PLAYERS_CUSTOM, MIN_PLAYERS_PREDEFINED,
};
use rand::seq::SliceRandom;

fn min_players(mode: GameMode) -> usize {
    match mode {
        GameMode::Predefined => MIN_PLAYERS_PREDEFINED,
        GameMode::Custom => MIN_PLAYERS_CUSTOM,
    }
}

impl GameEngine {
    /// Switch the game mode. Only meaningful in the lobby; a mid-game mode
    /// flip would orphan the questioner bookkeeping.
    pub async fn set_mode(&self, mode: GameMode) -> EngineResult<()> {
        self.store()
            .transact(self.session_key(), &|snapshot| match snapshot {
                Some(state) if state.phase == Phase::Lobby && state.mode != mode => {
                    let mut next = state.clone();
                    next.mode = mode;
                    Transaction::Write(next)
                }
                _ => Transaction::Abort,
            })
            .await?;
        Ok(())
    }

    /// Start a game from the lobby (or re-start one from the final
    /// standings). Refused without a partial write when the roster is too
    /// small for the chosen mode.
    pub async fn start(&self) -> EngineResult<()> {
        let Some(current) = self.store().load(self.session_key()).await? else {
            tracing::warn!("start() without a session document, ignoring");
            return Ok(());
        };

        let needed = min_players(current.mode);
        if current.players.len() < needed {
            return Err(EngineError::NotEnoughPlayers {
                needed,
                have: current.players.len(),
            });
        }

        let mode = current.mode;
        let questions = match mode {
            GameMode::Predefined => self.load_question_deck().await,
            GameMode::Custom => Vec::new(),
        };
        let duration = self.round_duration();

        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| {
                let Some(state) = snapshot else {
                    return Transaction::Abort;
                };
                // Revalidate inside the transaction; the roster or mode may
                // have changed since the check above
                if state.mode != mode || state.players.len() < min_players(mode) {
                    return Transaction::Abort;
                }
                if !matches!(state.phase, Phase::Lobby | Phase::GameOver) {
                    return Transaction::Abort;
                }

                let mut next = state.clone();
                next.reset_scores();
                next.current_question_index = 0;

                let entered = match mode {
                    GameMode::Predefined => {
                        next.questions = questions.clone();
                        next.transition(Phase::Guessing {
                            time_remaining: duration,
                            questioner: None,
                        })
                    }
                    GameMode::Custom => {
                        next.questions.clear();
                        let Some(host) = next.host_id().cloned() else {
                            return Transaction::Abort;
                        };
                        next.transition(Phase::Writing { questioner: host })
                    }
                };
                if !entered {
                    return Transaction::Abort;
                }
                Transaction::Write(next)
            })
            .await?;

        if let Some(state) = committed {
            tracing::info!(
                "Game started in {:?} mode with {} players",
                state.mode,
                state.players.len()
            );
        }
        Ok(())
    }

    /// Restart from the final standings: scores are zeroed and the
    /// mode-appropriate start transition runs again (PREDEFINED refetches
    /// and reshuffles the deck).
    pub async fn restart(&self) -> EngineResult<()> {
        self.start().await
    }

    /// End the current game early and show the final standings. Any client
    /// may trigger this; scores are kept so the leaderboard stays accurate.
    pub async fn end_game(&self) -> EngineResult<()> {
        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| match snapshot {
                Some(state)
                    if !matches!(state.phase, Phase::Lobby | Phase::GameOver) =>
                {
                    let mut next = state.clone();
                    next.reset_round_guesses();
                    if !next.transition(Phase::GameOver) {
                        return Transaction::Abort;
                    }
                    Transaction::Write(next)
                }
                _ => Transaction::Abort,
            })
            .await?;

        if committed.is_some() {
            tracing::info!("Game ended by {}", self.local_id());
        }
        Ok(())
    }

    /// Return everyone to the lobby after a finished game. Scores are
    /// zeroed, guesses cleared and the question deck dropped; the roster
    /// itself survives.
    pub async fn return_to_lobby(&self) -> EngineResult<()> {
        self.store()
            .transact(self.session_key(), &|snapshot| match snapshot {
                Some(state) if state.phase == Phase::GameOver => {
                    let mut next = state.clone();
                    next.reset_scores();
                    next.questions.clear();
                    next.current_question_index = 0;
                    if !next.transition(Phase::Lobby) {
                        return Transaction::Abort;
                    }
                    Transaction::Write(next)
                }
                _ => Transaction::Abort,
            })
            .await?;
        Ok(())
    }

    /// Fetch the predefined deck, falling back to the built-in set on any
    /// catalog failure. Never surfaces an error to the state machine.
    async fn load_question_deck(&self) -> Vec<Question> {
        let mut questions = match self.catalog().fetch_questions().await {
            Ok(questions) if !questions.is_empty() => questions,
            Ok(_) => {
                tracing::warn!(
                    "Catalog {} returned no questions, using built-in set",
                    self.catalog().name()
                );
                fallback_questions()
            }
            Err(e) => {
                tracing::warn!(
                    "Catalog {} fetch failed ({}), using built-in set",
                    self.catalog().name(),
                    e
                );
                fallback_questions()
            }
        };

        questions.shuffle(&mut rand::rng());
        questions
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{CatalogError, CatalogResult, QuestionCatalog, StaticCatalog};
    use crate::engine::testutil::*;
    use crate::engine::{EngineError, GameEngine};
    use crate::store::{MemoryStore, SessionStore};
    use crate::types::{GameMode, Phase, Question};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct BrokenCatalog;

    #[async_trait]
    impl QuestionCatalog for BrokenCatalog {
        async fn fetch_questions(&self) -> CatalogResult<Vec<Question>> {
            Err(CatalogError::ApiError("boom".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_start_requires_two_players_predefined() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice"]).await;

        let err = alice.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotEnoughPlayers { needed: 2, have: 1 }
        ));

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Lobby);
    }

    #[tokio::test]
    async fn test_start_requires_three_players_custom() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;
        alice.set_mode(GameMode::Custom).await.unwrap();

        let err = alice.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotEnoughPlayers { needed: 3, have: 2 }
        ));

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Lobby);
    }

    #[tokio::test]
    async fn test_predefined_start_enters_guessing_with_deck() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;

        alice.start().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(
            state.phase,
            Phase::Guessing {
                time_remaining: 15,
                questioner: None,
            }
        );
        assert_eq!(state.questions.len(), 4);
        assert_eq!(state.current_question_index, 0);
        assert!(state.players.iter().all(|p| p.score == 0 && !p.has_guessed));
    }

    #[tokio::test]
    async fn test_custom_start_makes_host_the_questioner() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob", "carol"]).await;
        alice.set_mode(GameMode::Custom).await.unwrap();

        alice.start().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(
            state.phase,
            Phase::Writing {
                questioner: "alice".to_string(),
            }
        );
        assert!(state.questions.is_empty());
    }

    #[tokio::test]
    async fn test_start_falls_back_when_catalog_fails() {
        let store = Arc::new(MemoryStore::new());
        let alice = GameEngine::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(BrokenCatalog),
            "alice".to_string(),
        );
        alice.join("Alice").await.unwrap();
        engine_for(&store, "bob").join("Bob").await.unwrap();

        alice.start().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        // The built-in fallback set, not an error
        assert_eq!(state.questions.len(), 4);
        assert!(matches!(state.phase, Phase::Guessing { .. }));
    }

    #[tokio::test]
    async fn test_set_mode_rejected_outside_lobby() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;
        alice.start().await.unwrap();

        alice.set_mode(GameMode::Custom).await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.mode, GameMode::Predefined);
    }

    #[tokio::test]
    async fn test_end_game_keeps_scores() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;
        alice.start().await.unwrap();

        // Give alice some points mid-game
        store
            .transact(alice.session_key(), &|snapshot| {
                let mut state = snapshot.cloned().unwrap();
                state.find_player_mut("alice").unwrap().score = 20;
                crate::store::Transaction::Write(state)
            })
            .await
            .unwrap();

        alice.end_game().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::GameOver);
        assert_eq!(state.find_player("alice").unwrap().score, 20);
    }

    #[tokio::test]
    async fn test_end_game_is_a_noop_in_lobby() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;

        alice.end_game().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Lobby);
    }

    #[tokio::test]
    async fn test_return_to_lobby_resets_scores_and_deck() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;
        alice.start().await.unwrap();
        alice.end_game().await.unwrap();

        alice.return_to_lobby().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Lobby);
        assert_eq!(state.players.len(), 2);
        assert!(state.questions.is_empty());
        assert!(state.players.iter().all(|p| p.score == 0));
    }

    #[tokio::test]
    async fn test_restart_after_game_over_zeroes_scores() {
        let store = Arc::new(MemoryStore::new());
        let alice = lobby_with_players(&store, &["alice", "bob"]).await;
        alice.start().await.unwrap();

        store
            .transact(alice.session_key(), &|snapshot| {
                let mut state = snapshot.cloned().unwrap();
                state.find_player_mut("bob").unwrap().score = 30;
                crate::store::Transaction::Write(state)
            })
            .await
            .unwrap();
        alice.end_game().await.unwrap();

        alice.restart().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        assert!(matches!(state.phase, Phase::Guessing { .. }));
        assert!(state.players.iter().all(|p| p.score == 0));
    }

    #[tokio::test]
    async fn test_deck_contents_match_catalog() {
        // Deck order is shuffled, but the contents must match the catalog
        let store = Arc::new(MemoryStore::new());
        let alice = GameEngine::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(StaticCatalog::builtin()),
            "alice".to_string(),
        );
        alice.join("Alice").await.unwrap();
        engine_for(&store, "bob").join("Bob").await.unwrap();
        alice.start().await.unwrap();

        let state = store.load(alice.session_key()).await.unwrap().unwrap();
        let mut prompts: Vec<_> = state.questions.iter().map(|q| q.prompt.clone()).collect();
        prompts.sort();
        let mut expected: Vec<_> = crate::catalog::fallback_questions()
            .iter()
            .map(|q| q.prompt.clone())
            .collect();
        expected.sort();
        assert_eq!(prompts, expected);
    }
}
