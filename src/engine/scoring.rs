use super::{EngineResult, GameEngine};
use crate::store::Transaction;
use crate::types::{Phase, PlayerId, RoundWinner, ROUND_AWARD};

impl GameEngine {
    /// Score the current round and move the session into REVEAL.
    ///
    /// Host-only by call site (the countdown task), but correctness never
    /// depends on host uniqueness: the whole evaluation is one transaction
    /// guarded on phase GUESSING, so a duplicate trigger (a timer tick
    /// racing the all-answered signal, or a second client transiently
    /// believing it is host) finds the phase already advanced and no-ops.
    pub(crate) async fn evaluate_round(&self) -> EngineResult<()> {
        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| {
                let Some(state) = snapshot else {
                    return Transaction::Abort;
                };
                let Phase::Guessing { questioner, .. } = &state.phase else {
                    // Already evaluated, or the round was torn down
                    return Transaction::Abort;
                };
                let Some(question) = state.current_question() else {
                    return Transaction::Abort;
                };
                let answer = question.answer;
                let questioner = questioner.clone();

                let mut next = state.clone();

                // Record a diff for every scoring player; no guess scores as
                // an unbounded, guaranteed-losing distance. The questioner's
                // diff stays unset.
                let mut best_diff = f64::INFINITY;
                for player in &mut next.players {
                    if Some(&player.id) == questioner.as_ref() {
                        player.diff = None;
                        continue;
                    }
                    let diff = player
                        .current_guess
                        .map_or(f64::INFINITY, |guess| (guess - answer).abs());
                    player.diff = Some(diff);
                    if player.current_guess.is_some() && diff < best_diff {
                        best_diff = diff;
                    }
                }

                // Exact equality is intentional: genuine ties are a designed
                // outcome, every tied player wins the round
                let winners: Vec<PlayerId> = if best_diff.is_finite() {
                    next.players
                        .iter()
                        .filter(|p| p.diff == Some(best_diff))
                        .map(|p| p.id.clone())
                        .collect()
                } else {
                    Vec::new()
                };

                for player in &mut next.players {
                    if winners.contains(&player.id) {
                        player.score += ROUND_AWARD;
                    }
                }

                let winner = match winners.as_slice() {
                    [] => None,
                    [sole] => Some(RoundWinner::Player(sole.clone())),
                    _ => Some(RoundWinner::Tie),
                };

                if !next.transition(Phase::Reveal { winner, questioner }) {
                    return Transaction::Abort;
                }
                Transaction::Write(next)
            })
            .await?;

        match committed {
            Some(state) => {
                let Phase::Reveal { winner, .. } = &state.phase else {
                    unreachable!("evaluation commits a reveal");
                };
                tracing::info!("Round evaluated, winner: {:?}", winner);
            }
            None => tracing::debug!("Evaluation skipped, round already settled"),
        }
        Ok(())
    }
}
