use crate::types::PositionKey;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn engine `{path}`: {source}")]
    Spawn { path: String, #[source] source: std::io::Error },
    #[error("engine has no stdin")]
    NoStdin,
    #[error("engine has no stdout")]
    NoStdout,
    #[error("engine disconnected")]
    Disconnected,
    #[error("engine session shut down")]
    Shutdown,
    #[error("no pending request for position {0}")]
    NothingPending(PositionKey),
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
    #[error("invalid PGN: {0}")]
    InvalidPgn(String),
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("not your turn")]
    NotYourTurn,
    #[error("game is over")]
    GameOver,
    #[error("no moves to undo")]
    NothingToUndo,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Game(#[from] GameError),
}
