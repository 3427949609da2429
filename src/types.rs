use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use shakmaty::Color;
use std::fmt;

/// Canonical board-state string (FEN) used to match engine replies to the
/// position they were requested for. Never inspected for content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey(String);

impl PositionKey {
    pub fn new(fen: impl Into<String>) -> Self { Self(fen.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Everything the engine needs to reconstruct a position: the starting FEN
/// and the moves played since, plus the key replies are matched against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchRequest {
    pub position: PositionKey,
    pub start_fen: String,
    pub moves: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    BestMove,
    Evaluation,
}

/// Engine strength. `Impossible` is the engine's default search and is sent
/// as a plain `go`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    #[default]
    Impossible,
}

impl Difficulty {
    pub fn tier(self) -> u8 {
        match self {
            Difficulty::Easy => 0,
            Difficulty::Medium => 1,
            Difficulty::Hard => 2,
            Difficulty::Impossible => 3,
        }
    }

    pub fn from_tier(tier: u8) -> Option<Self> {
        match tier {
            0 => Some(Difficulty::Easy),
            1 => Some(Difficulty::Medium),
            2 => Some(Difficulty::Hard),
            3 => Some(Difficulty::Impossible),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Competitive,
    Training,
    Analysis,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    White,
    Black,
}

impl From<Side> for Color {
    fn from(side: Side) -> Color {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// Quality of a played move relative to the engine's best-scored move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bad = 0,
    Ok = 1,
    Good = 2,
    Perfect = 3,
}

impl Tier {
    pub fn value(self) -> u8 { self as u8 }
}

/// Game result from the human's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeTag {
    Win,
    Loss,
    Draw,
}

/// Notifications for the display layer. Rendering is entirely its business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DisplayEvent {
    BoardChanged { fen: String },
    MoveListChanged { san: Vec<String> },
    MoveQuality { tier: Option<Tier> },
    Analysis { best: String, score: i32 },
    Clock { white_ms: u64, black_ms: u64 },
    GameOver { outcome: OutcomeTag, result: String },
    EngineDisconnected,
}
