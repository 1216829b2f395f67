mod lifecycle;
mod roster;
mod round;
mod scoring;
mod timer;

use crate::catalog::QuestionCatalog;
use crate::store::{SessionStore, StoreError};
use crate::types::{Phase, PlayerId, SessionState, ROUND_DURATION_SECS, SESSION_KEY};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to the presentation layer. Everything else (vanished
/// document, duplicate evaluation, catalog failures) is recovered silently.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("at least {needed} players required, have {have}")]
    NotEnoughPlayers { needed: usize, have: usize },
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The one shared document key; there is no multi-room routing
    pub session_key: String,
    /// Countdown length for every guessing round, in seconds
    pub round_duration: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_key: SESSION_KEY.to_string(),
            round_duration: ROUND_DURATION_SECS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_key: std::env::var("SCHATZDUELL_SESSION_KEY")
                .ok()
                .and_then(|key| {
                    let trimmed = key.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
                .unwrap_or(defaults.session_key),
            round_duration: std::env::var("SCHATZDUELL_ROUND_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.round_duration),
        }
    }
}

/// The session coordination engine run by every client.
///
/// All game state lives in the shared document; the engine only holds the
/// local identity, the injected store and catalog, and the latest snapshot
/// republished for the presentation layer. Whichever client currently
/// occupies roster position 0 additionally runs the round countdown.
pub struct GameEngine {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn QuestionCatalog>,
    local_id: PlayerId,
    config: EngineConfig,
    snapshot_tx: watch::Sender<Option<SessionState>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl GameEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn QuestionCatalog>,
        local_id: PlayerId,
    ) -> Arc<Self> {
        Self::with_config(store, catalog, local_id, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn QuestionCatalog>,
        local_id: PlayerId,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(None);
        Arc::new(Self {
            store,
            catalog,
            local_id,
            config,
            snapshot_tx,
            countdown: Mutex::new(None),
        })
    }

    /// The identity this client claims in the roster
    pub fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    pub(crate) fn session_key(&self) -> &str {
        &self.config.session_key
    }

    pub(crate) fn round_duration(&self) -> u32 {
        self.config.round_duration
    }

    pub(crate) fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub(crate) fn catalog(&self) -> &dyn QuestionCatalog {
        self.catalog.as_ref()
    }

    /// Latest observed snapshot, for the presentation layer
    pub fn state(&self) -> Option<SessionState> {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch the stream of snapshots as they arrive
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionState>> {
        self.snapshot_tx.subscribe()
    }

    /// Pure host election: am I roster position 0 in the latest snapshot?
    /// Never persisted, recomputed on every snapshot. Transient disagreement
    /// between clients is tolerated because every host-gated effect is
    /// idempotent and phase-guarded.
    pub fn is_host(&self) -> bool {
        self.snapshot_tx
            .borrow()
            .as_ref()
            .and_then(|s| s.host_id().cloned())
            .is_some_and(|host| host == self.local_id)
    }

    /// Spawn the snapshot watcher driving host election and the countdown.
    /// Returns the watcher task handle; aborting it stops the engine.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut updates = engine.store.subscribe(engine.session_key());
            loop {
                match updates.recv().await {
                    Ok(snapshot) => engine.on_snapshot(snapshot).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Snapshots are full documents; the next one catches us up
                        tracing::warn!("Snapshot watcher lagged, skipped {} updates", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Snapshot stream closed, stopping watcher");
                        break;
                    }
                }
            }
            engine.teardown_countdown().await;
        })
    }

    /// React to one committed snapshot: republish it, then arm or tear down
    /// the countdown depending on host status and phase.
    async fn on_snapshot(self: &Arc<Self>, snapshot: SessionState) {
        let host = snapshot.host_id() == Some(&self.local_id);
        let guessing = matches!(snapshot.phase, Phase::Guessing { .. });
        // send_replace stores the snapshot even while nobody is watching
        self.snapshot_tx.send_replace(Some(snapshot));

        if host && guessing {
            self.arm_countdown().await;
        } else {
            self.teardown_countdown().await;
        }
    }

    async fn arm_countdown(self: &Arc<Self>) {
        let mut countdown = self.countdown.lock().await;
        let running = countdown.as_ref().is_some_and(|task| !task.is_finished());
        if !running {
            tracing::debug!("Arming round countdown");
            *countdown = Some(tokio::spawn(timer::run_countdown(Arc::clone(self))));
        }
    }

    async fn teardown_countdown(&self) {
        if let Some(task) = self.countdown.lock().await.take() {
            task.abort();
        }
    }
}
