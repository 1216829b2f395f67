use super::{EngineResult, GameEngine};
use crate::store::Transaction;
use crate::types::{GameMode, Phase, PlayerId, Question, SessionState};

/// Pick the questioner for the next WRITING phase: the scoring player with
/// the worst guess this round, ties broken by roster order. Players who
/// never guessed are not candidates. When nobody guessed, the first roster
/// member other than the previous questioner takes over; the previous
/// questioner is only kept when there is no one else at all.
fn next_questioner(state: &SessionState, previous: Option<&PlayerId>) -> Option<PlayerId> {
    let mut worst: Option<(&PlayerId, f64)> = None;
    for player in state.players.iter().filter(|p| Some(&p.id) != previous) {
        if player.current_guess.is_none() {
            continue;
        }
        let diff = player.diff.unwrap_or(0.0);
        if worst.is_none_or(|(_, w)| diff > w) {
            worst = Some((&player.id, diff));
        }
    }
    if let Some((id, _)) = worst {
        return Some(id.clone());
    }

    state
        .players
        .iter()
        .find(|p| Some(&p.id) != previous)
        .map(|p| p.id.clone())
        .or_else(|| previous.cloned())
}

impl GameEngine {
    /// Record the local player's guess for the current round. When every
    /// required player has answered, the clock is forced to zero in the
    /// same transaction as an early-evaluation signal for the host.
    pub async fn submit_guess(&self, value: f64) -> EngineResult<()> {
        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| {
                let Some(state) = snapshot else {
                    return Transaction::Abort;
                };
                let Phase::Guessing { questioner, .. } = &state.phase else {
                    return Transaction::Abort;
                };
                if questioner.as_ref() == Some(self.local_id()) {
                    // The active questioner has no guess this round
                    return Transaction::Abort;
                }

                let questioner = questioner.clone();
                let mut next = state.clone();
                let Some(player) = next.find_player_mut(self.local_id()) else {
                    return Transaction::Abort;
                };
                player.current_guess = Some(value);
                player.has_guessed = true;

                if next.all_required_guessed() {
                    next.phase = Phase::Guessing {
                        time_remaining: 0,
                        questioner,
                    };
                }
                Transaction::Write(next)
            })
            .await?;

        if let Some(state) = committed {
            tracing::debug!(
                "Guess {} recorded for {}, all answered: {}",
                value,
                self.local_id(),
                state.all_required_guessed()
            );
        } else {
            tracing::warn!("Guess from {} ignored (not guessing, or not in roster)", self.local_id());
        }
        Ok(())
    }

    /// Author the question for the current round slot. Only meaningful for
    /// the active questioner; an existing question at the slot is
    /// overwritten, so typos can be fixed until the round advances.
    pub async fn submit_custom_question(
        &self,
        prompt: &str,
        answer: f64,
        unit: &str,
    ) -> EngineResult<()> {
        let question = Question::authored(prompt, answer, unit);
        let duration = self.round_duration();

        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| {
                let Some(state) = snapshot else {
                    return Transaction::Abort;
                };
                let Phase::Writing { questioner } = &state.phase else {
                    return Transaction::Abort;
                };
                if questioner != self.local_id() {
                    return Transaction::Abort;
                }
                let questioner = questioner.clone();

                let mut next = state.clone();
                if next.questions.len() <= next.current_question_index {
                    next.questions.push(question.clone());
                } else {
                    next.questions[next.current_question_index] = question.clone();
                }

                next.reset_round_guesses();
                // The questioner is permanently exempt from answering this round
                if let Some(author) = next.find_player_mut(&questioner) {
                    author.has_guessed = true;
                }

                if !next.transition(Phase::Guessing {
                    time_remaining: duration,
                    questioner: Some(questioner),
                }) {
                    return Transaction::Abort;
                }
                Transaction::Write(next)
            })
            .await?;

        if committed.is_some() {
            tracing::info!("Custom question authored by {}", self.local_id());
        }
        Ok(())
    }

    /// Leave the reveal: next question (PREDEFINED), final standings when
    /// the deck is exhausted, or a new writing phase with the rotated
    /// questioner (CUSTOM).
    pub async fn advance_round(&self) -> EngineResult<()> {
        let duration = self.round_duration();

        let committed = self
            .store()
            .transact(self.session_key(), &|snapshot| {
                let Some(state) = snapshot else {
                    return Transaction::Abort;
                };
                let Phase::Reveal { questioner, .. } = &state.phase else {
                    return Transaction::Abort;
                };
                let previous = questioner.clone();

                let mut next = state.clone();
                let entered = match state.mode {
                    GameMode::Predefined => {
                        if state.current_question_index + 1 >= state.questions.len() {
                            next.transition(Phase::GameOver)
                        } else {
                            next.current_question_index += 1;
                            next.reset_round_guesses();
                            next.transition(Phase::Guessing {
                                time_remaining: duration,
                                questioner: None,
                            })
                        }
                    }
                    GameMode::Custom => {
                        // Rotation reads this round's diffs, so pick before
                        // clearing guess state
                        let Some(rotated) = next_questioner(state, previous.as_ref()) else {
                            return Transaction::Abort;
                        };
                        next.current_question_index += 1;
                        next.reset_round_guesses();
                        next.transition(Phase::Writing { questioner: rotated })
                    }
                };
                if !entered {
                    return Transaction::Abort;
                }
                Transaction::Write(next)
            })
            .await?;

        if let Some(state) = committed {
            tracing::info!("Advanced to {}", state.phase.name());
        }
        Ok(())
    }
}
