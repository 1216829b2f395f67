use super::{EngineResult, GameEngine};
use crate::store::Transaction;
use crate::types::Phase;
use std::sync::Arc;
use std::time::Duration;

/// What one countdown tick decided
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// The clock was decremented, keep ticking
    Counted,
    /// The clock was already at zero, time to evaluate
    Expired,
    /// The round is gone (phase moved, document vanished), stand down
    Stopped,
}

/// The host's countdown loop, armed on entering GUESSING and aborted on any
/// phase change or loss of host status. One tick per second; a tick that
/// observes zero stops the loop and hands over to the round evaluator,
/// which re-checks the phase itself, so a racing second trigger is harmless.
pub(crate) async fn run_countdown(engine: Arc<GameEngine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    // The first tick of a tokio interval completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        match engine.tick_countdown().await {
            Ok(TickOutcome::Counted) => {}
            Ok(TickOutcome::Expired) => {
                if let Err(e) = engine.evaluate_round().await {
                    tracing::error!("Round evaluation failed: {}", e);
                }
                break;
            }
            Ok(TickOutcome::Stopped) => break,
            Err(e) => {
                tracing::error!("Countdown tick failed: {}", e);
                break;
            }
        }
    }
    tracing::debug!("Countdown stopped");
}

impl GameEngine {
    /// One atomic countdown step: decrement the clock while the round is
    /// still in GUESSING, floored at zero. Never decrements outside
    /// GUESSING, so a tick waking up after the round settled is a no-op.
    pub(crate) async fn tick_countdown(&self) -> EngineResult<TickOutcome> {
        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| match snapshot {
                Some(state) => match &state.phase {
                    Phase::Guessing {
                        time_remaining,
                        questioner,
                    } if *time_remaining > 0 => {
                        let mut next = state.clone();
                        next.phase = Phase::Guessing {
                            time_remaining: time_remaining - 1,
                            questioner: questioner.clone(),
                        };
                        Transaction::Write(next)
                    }
                    _ => Transaction::Abort,
                },
                None => Transaction::Abort,
            })
            .await?;

        if committed.is_some() {
            return Ok(TickOutcome::Counted);
        }

        // Nothing written: either the clock already sat at zero (natural
        // expiry, or forced there by the all-answered signal) or the round
        // is no longer running
        match self.store().load(self.session_key()).await? {
            Some(state) if matches!(state.phase, Phase::Guessing { time_remaining: 0, .. }) => {
                Ok(TickOutcome::Expired)
            }
            _ => Ok(TickOutcome::Stopped),
        }
    }
}
