use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type QuestionId = String;

/// Seconds on the clock for every guessing round
pub const ROUND_DURATION_SECS: u32 = 15;

/// Points granted to every player tied for the closest guess
pub const ROUND_AWARD: u32 = 10;

/// The single shared room every client coordinates through
pub const SESSION_KEY: &str = "schatzduell_main_room";

pub const MIN_PLAYERS_PREDEFINED: usize = 2;
pub const MIN_PLAYERS_CUSTOM: usize = 3;

/// Generate a fresh client identity. Persisting it across reloads is the
/// caller's job.
pub fn new_player_id() -> PlayerId {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Predefined,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub current_guess: Option<f64>,
    pub has_guessed: bool,
    /// Distance to the correct answer, filled in by round evaluation.
    /// Stays unset for the active questioner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<f64>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            score: 0,
            current_guess: None,
            has_guessed: false,
            diff: None,
        }
    }

    /// Clear per-round guess state
    pub fn reset_guess(&mut self) {
        self.current_guess = None;
        self.has_guessed = false;
        self.diff = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    pub answer: f64,
    pub unit: String,
    /// When this question was authored (ISO8601), set for in-session questions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Question {
    /// A question authored in-session by the active questioner
    pub fn authored(prompt: impl Into<String>, answer: f64, unit: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            prompt: prompt.into(),
            answer,
            unit: unit.into(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Outcome of a round: a sole closest guesser, or a genuine tie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundWinner {
    Player(PlayerId),
    Tie,
}

/// Current stage of the session, carrying exactly the fields valid in that
/// stage. `questioner` is only ever set in CUSTOM mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Writing {
        questioner: PlayerId,
    },
    Guessing {
        time_remaining: u32,
        questioner: Option<PlayerId>,
    },
    Reveal {
        winner: Option<RoundWinner>,
        questioner: Option<PlayerId>,
    },
    GameOver,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Lobby => "LOBBY",
            Phase::Writing { .. } => "WRITING",
            Phase::Guessing { .. } => "GUESSING",
            Phase::Reveal { .. } => "REVEAL",
            Phase::GameOver => "GAME_OVER",
        }
    }

    /// The active questioner, in any phase that tracks one
    pub fn questioner(&self) -> Option<&PlayerId> {
        match self {
            Phase::Writing { questioner } => Some(questioner),
            Phase::Guessing { questioner, .. } | Phase::Reveal { questioner, .. } => {
                questioner.as_ref()
            }
            Phase::Lobby | Phase::GameOver => None,
        }
    }

    /// Check if a phase transition is valid
    pub fn can_become(&self, to: &Phase) -> bool {
        use Phase::*;

        match (self, to) {
            // Starting a game (also the restart path out of GAME_OVER)
            (Lobby, Guessing { .. }) => true,
            (Lobby, Writing { .. }) => true,
            (GameOver, Guessing { .. }) => true,
            (GameOver, Writing { .. }) => true,

            // Normal round flow
            (Writing { .. }, Guessing { .. }) => true,
            (Guessing { .. }, Reveal { .. }) => true,
            (Reveal { .. }, Guessing { .. }) => true,
            (Reveal { .. }, Writing { .. }) => true,
            (Reveal { .. }, GameOver) => true,

            // Leaving the final standings
            (GameOver, Lobby) => true,

            // Ending the session early is always allowed
            (Writing { .. }, GameOver) => true,
            (Guessing { .. }, GameOver) => true,

            // Hard reset lands everyone back in the lobby from anywhere
            (_, Lobby) => true,

            // All other transitions are invalid
            _ => false,
        }
    }
}

/// The single shared document all clients read and write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub mode: GameMode,
    #[serde(flatten)]
    pub phase: Phase,
    /// Join order; the player at index 0 is the host. Derived, never stored
    /// separately.
    pub players: Vec<Player>,
    pub current_question_index: usize,
    pub questions: Vec<Question>,
}

impl SessionState {
    /// The pristine document written on lazy creation and on hard reset
    pub fn initial() -> Self {
        Self {
            mode: GameMode::Predefined,
            phase: Phase::Lobby,
            players: Vec::new(),
            current_question_index: 0,
            questions: Vec::new(),
        }
    }

    /// The host is whoever occupies roster position 0
    pub fn host_id(&self) -> Option<&PlayerId> {
        self.players.first().map(|p| &p.id)
    }

    pub fn find_player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn find_player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    /// Every player required to answer this round has done so. The active
    /// questioner never counts.
    pub fn all_required_guessed(&self) -> bool {
        let questioner = self.phase.questioner();
        self.players
            .iter()
            .filter(|p| Some(&p.id) != questioner)
            .all(|p| p.has_guessed)
    }

    /// Clear every player's per-round guess state
    pub fn reset_round_guesses(&mut self) {
        for player in &mut self.players {
            player.reset_guess();
        }
    }

    /// Zero every score and clear guesses, keeping the roster
    pub fn reset_scores(&mut self) {
        for player in &mut self.players {
            player.score = 0;
            player.reset_guess();
        }
    }

    /// Apply a phase transition if the transition table allows it.
    /// Returns false (and leaves the state untouched) otherwise.
    pub fn transition(&mut self, to: Phase) -> bool {
        if !self.phase.can_become(&to) {
            tracing::warn!(
                "Invalid phase transition from {} to {}",
                self.phase.name(),
                to.name()
            );
            return false;
        }
        self.phase = to;
        true
    }
}
