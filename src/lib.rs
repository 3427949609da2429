pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod protocol;
pub mod router;
pub mod session;
pub mod training;
pub mod types;

pub use config::{AppConfig, EngineConfig, TimeControl};
pub use engine::{EngineProcess, ShutdownHandle};
pub use error::{EngineError, GameError, SessionError};
pub use game::GameState;
pub use router::{EvaluationBatch, PendingRequest, ResponseRouter};
pub use session::{Browse, GameSetup, Session};
pub use training::{TrainingEvaluator, TrainingRecord};
pub use types::{Difficulty, DisplayEvent, Mode, OutcomeTag, PositionKey, RequestId, SearchRequest, Side, Tier};
