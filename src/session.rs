use crate::clock::GameClock;
use crate::config::AppConfig;
use crate::engine::{EngineProcess, ShutdownHandle};
use crate::error::{EngineError, GameError, SessionError};
use crate::game::{result_str, GameState};
use crate::training::TrainingEvaluator;
use crate::types::{Difficulty, DisplayEvent, Mode, OutcomeTag, RequestKind, Tier};
use chrono::Local;
use log::{debug, info, warn};
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Color, Outcome};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

pub enum GameSetup {
    Start,
    Fen(String),
    Pgn(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Browse {
    Back,
    Forward,
    Latest,
}

/// Runs one human-versus-engine game at a time.
///
/// Issues engine requests as the game advances, resolves the replies,
/// grades human moves in training mode and reports everything to the
/// display layer through `events`.
pub struct Session {
    engine: EngineProcess,
    game: GameState,
    trainer: TrainingEvaluator,
    config: AppConfig,
    clock: Option<GameClock>,
    events: mpsc::Sender<DisplayEvent>,
    view: Option<usize>,
    finished: bool,
}

impl Session {
    pub async fn start(config: AppConfig, events: mpsc::Sender<DisplayEvent>) -> Result<Self, SessionError> {
        let engine = EngineProcess::spawn(&config.engine, config.channel_capacity).await?;
        let game = GameState::new(config.human_side.into());
        let mut session = Self {
            engine,
            game,
            trainer: TrainingEvaluator::new(),
            clock: None,
            config,
            events,
            view: None,
            finished: false,
        };
        session.begin().await?;
        Ok(session)
    }

    pub fn game(&self) -> &GameState { &self.game }
    pub fn engine(&self) -> &EngineProcess { &self.engine }
    pub fn mode(&self) -> Mode { self.config.mode }
    pub fn difficulty(&self) -> Difficulty { self.config.difficulty }
    pub fn trainer(&self) -> &TrainingEvaluator { &self.trainer }
    pub fn is_finished(&self) -> bool { self.finished }
    pub fn wake_signal(&self) -> Arc<Notify> { self.engine.wake_signal() }
    pub fn shutdown_handle(&self) -> ShutdownHandle { self.engine.shutdown_handle() }

    pub fn engine_to_move(&self) -> bool {
        !self.finished && self.config.mode != Mode::Analysis && !self.game.is_human_turn()
    }

    /// Replaces the current game. Bad FEN or PGN input leaves the old game running.
    pub async fn new_game(&mut self, setup: GameSetup) -> Result<(), SessionError> {
        let human: Color = self.config.human_side.into();
        let game = match setup {
            GameSetup::Start => GameState::new(human),
            GameSetup::Fen(fen) => GameState::from_fen(&fen, human)?,
            GameSetup::Pgn(pgn) => GameState::from_pgn(&pgn, human)?,
        };
        info!("New game from {}", game.start_fen());
        self.game = game;
        self.trainer.reset();
        self.discard_unwanted();
        self.begin().await
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) { self.config.difficulty = difficulty; }

    pub async fn set_mode(&mut self, mode: Mode) -> Result<(), SessionError> {
        if self.config.mode == mode { return Ok(()); }
        self.config.mode = mode;
        self.discard_unwanted();
        self.request_for_turn().await
    }

    /// Plays the human's move. In training mode the move is graded against
    /// the engine's evaluation of the position it was played from.
    pub async fn human_move(&mut self, m: &Uci) -> Result<Option<Tier>, SessionError> {
        if self.finished { return Err(GameError::GameOver.into()); }
        if self.config.mode != Mode::Analysis && !self.game.is_human_turn() {
            return Err(GameError::NotYourTurn.into());
        }
        let before = self.game.position_key();
        // Reject illegal input before touching the engine conversation.
        let mv = m.to_move(self.game.board()).map_err(|_| GameError::IllegalMove(m.to_string()))?;
        let played = Uci::from_move(&mv, CastlingMode::Standard);

        let tier = if self.config.mode == Mode::Training {
            self.refresh_training(true).await?;
            self.trainer.classify(&before, &played)
        } else {
            None
        };

        let outcome = self.game.apply_move(&played)?;
        self.after_move(outcome).await?;
        if self.config.mode == Mode::Training {
            self.emit(DisplayEvent::MoveQuality { tier }).await;
        }
        Ok(tier)
    }

    /// Waits for the engine's reply to the current position and plays it.
    pub async fn engine_reply(&mut self) -> Result<Uci, SessionError> {
        if !self.engine_to_move() { return Err(GameError::NotYourTurn.into()); }
        let key = self.game.position_key();
        let m = match self.engine.wait_best_move(&key).await {
            Ok(m) => m,
            Err(e) => return Err(self.engine_failure(e).await.into()),
        };
        self.play_engine_move(&m).await?;
        Ok(m)
    }

    /// Non-blocking counterpart of `engine_reply`, also resolving analysis
    /// results. Returns whether anything changed.
    pub async fn poll(&mut self) -> Result<bool, SessionError> {
        if let Err(e) = self.engine.check_connection() {
            return Err(self.engine_failure(e).await.into());
        }
        self.discard_unwanted();
        let key = self.game.position_key();
        if self.engine_to_move() {
            match self.engine.get_best_move(&key) {
                Ok(Some(m)) => {
                    self.play_engine_move(&m).await?;
                    return Ok(true);
                }
                Ok(None) => {}
                Err(e) => return Err(self.engine_failure(e).await.into()),
            }
        }
        if self.config.mode == Mode::Analysis {
            return self.refresh_analysis(false).await;
        }
        if self.config.mode == Mode::Training {
            return self.refresh_training(false).await;
        }
        Ok(false)
    }

    /// Waits for the evaluation of the current position and reports the best move.
    pub async fn analysis(&mut self) -> Result<(Uci, i32), SessionError> {
        self.refresh_analysis(true).await?;
        let key = self.game.position_key();
        self.trainer.record()
            .filter(|r| r.position == key)
            .map(|r| (r.best_move.clone(), r.best_score))
            .ok_or_else(|| EngineError::NothingPending(key).into())
    }

    /// Takes back one ply, then asks the engine for whatever the new position needs.
    pub async fn undo(&mut self) -> Result<Uci, SessionError> {
        let m = self.game.undo()?;
        debug!("Took back {}", m);
        self.finished = false;
        self.view = None;
        if let Some(clock) = &mut self.clock {
            let now = Instant::now();
            clock.stop(now);
            clock.start(self.game.turn(), now);
        }
        self.publish_board().await;
        self.request_for_turn().await?;
        Ok(m)
    }

    /// Moves the view cursor through past positions without changing the game.
    pub async fn browse(&mut self, step: Browse) -> Option<usize> {
        let latest = self.game.ply();
        let current = self.view.unwrap_or(latest);
        let target = match step {
            Browse::Back => current.checked_sub(1)?,
            Browse::Forward if current < latest => current + 1,
            Browse::Forward => return None,
            Browse::Latest => latest,
        };
        self.view = (target != latest).then_some(target);
        let fen = self.game.fen_at(target)?;
        self.emit(DisplayEvent::BoardChanged { fen }).await;
        Some(target)
    }

    pub fn export_fen(&self) -> String { self.game.fen() }

    pub fn export_pgn(&self) -> String { self.game.to_pgn(Local::now().date_naive()) }

    /// Emits a clock update, declaring a loss on time if the mover has flagged.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        let Some(clock) = &self.clock else { return };
        let (white_ms, black_ms) = clock.millis(now);
        let flagged = clock.flagged(now);
        self.emit(DisplayEvent::Clock { white_ms, black_ms }).await;
        if let Some(side) = flagged {
            self.lose_on_time(side).await;
        }
    }

    pub async fn shutdown(self) { self.engine.shutdown().await; }

    async fn begin(&mut self) -> Result<(), SessionError> {
        self.finished = false;
        self.view = None;
        self.clock = self.config.time_control.map(GameClock::new);
        if let Some(clock) = &mut self.clock {
            clock.start(self.game.turn(), Instant::now());
        }
        self.publish_board().await;
        if let Some(outcome) = self.game.outcome() {
            self.finish(outcome).await;
            return Ok(());
        }
        self.request_for_turn().await
    }

    /// Issues the request the current position needs, if any.
    async fn request_for_turn(&mut self) -> Result<(), SessionError> {
        if self.finished { return Ok(()); }
        let kind = match self.config.mode {
            Mode::Analysis => RequestKind::Evaluation,
            _ if !self.game.is_human_turn() => RequestKind::BestMove,
            Mode::Training => RequestKind::Evaluation,
            Mode::Competitive => return Ok(()),
        };
        let request = self.game.search_request();
        if self.engine.has_pending(&request.position, kind) { return Ok(()); }
        let result = match kind {
            RequestKind::BestMove => self.engine.request_best_move(&request, self.config.difficulty).await,
            RequestKind::Evaluation => self.engine.request_evaluation(&request).await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.engine_failure(e).await.into()),
        }
    }

    /// Drops resolved replies the current mode never reads. Best moves are
    /// only read in the competitive and training modes, evaluations only in
    /// training and analysis.
    fn discard_unwanted(&mut self) {
        match self.config.mode {
            Mode::Analysis => self.engine.discard_resolved(RequestKind::BestMove),
            Mode::Competitive => self.engine.discard_resolved(RequestKind::Evaluation),
            Mode::Training => {}
        }
    }

    async fn play_engine_move(&mut self, m: &Uci) -> Result<(), SessionError> {
        let outcome = match self.game.apply_move(m) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Engine played an illegal move: {}", m);
                return Err(e.into());
            }
        };
        self.after_move(outcome).await
    }

    async fn after_move(&mut self, outcome: Option<Outcome>) -> Result<(), SessionError> {
        self.view = None;
        let flagged = self.clock.as_mut().and_then(|c| c.press(Instant::now()));
        self.publish_board().await;
        if let Some(side) = flagged {
            self.lose_on_time(side).await;
            return Ok(());
        }
        if let Some(outcome) = outcome {
            self.finish(outcome).await;
            return Ok(());
        }
        self.request_for_turn().await
    }

    async fn refresh_training(&mut self, block: bool) -> Result<bool, SessionError> {
        let key = self.game.position_key();
        if self.trainer.is_for(&key) { return Ok(false); }
        let batch = if block && self.engine.has_pending(&key, RequestKind::Evaluation) {
            self.engine.wait_evaluation(&key).await.map(Some)
        } else {
            self.engine.get_evaluation_batch(&key)
        };
        match batch {
            Ok(Some(batch)) => {
                self.trainer.update(key, &batch);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(self.engine_failure(e).await.into()),
        }
    }

    async fn refresh_analysis(&mut self, block: bool) -> Result<bool, SessionError> {
        let fresh = self.refresh_training(block).await?;
        self.discard_unwanted();
        if !fresh { return Ok(false); }
        if let Some(record) = self.trainer.record() {
            let event = DisplayEvent::Analysis { best: record.best_move.to_string(), score: record.best_score };
            self.emit(event).await;
        }
        Ok(true)
    }

    async fn publish_board(&self) {
        self.emit(DisplayEvent::BoardChanged { fen: self.game.fen() }).await;
        self.emit(DisplayEvent::MoveListChanged { san: self.game.san_moves() }).await;
        if let Some(clock) = &self.clock {
            let (white_ms, black_ms) = clock.millis(Instant::now());
            self.emit(DisplayEvent::Clock { white_ms, black_ms }).await;
        }
    }

    async fn finish(&mut self, outcome: Outcome) {
        self.finished = true;
        if let Some(clock) = &mut self.clock { clock.stop(Instant::now()); }
        let tag = self.game.outcome_tag(outcome);
        info!("Game over: {}", result_str(outcome));
        self.emit(DisplayEvent::GameOver { outcome: tag, result: result_str(outcome).to_string() }).await;
    }

    async fn lose_on_time(&mut self, side: Color) {
        if self.finished { return; }
        self.finished = true;
        if let Some(clock) = &mut self.clock { clock.stop(Instant::now()); }
        let outcome = Outcome::Decisive { winner: !side };
        let tag = if side == self.game.human() { OutcomeTag::Loss } else { OutcomeTag::Win };
        info!("{:?} lost on time", side);
        self.emit(DisplayEvent::GameOver { outcome: tag, result: result_str(outcome).to_string() }).await;
    }

    async fn engine_failure(&self, e: EngineError) -> EngineError {
        if matches!(e, EngineError::Disconnected) {
            warn!("Engine disconnected");
            self.emit(DisplayEvent::EngineDisconnected).await;
        }
        e
    }

    async fn emit(&self, event: DisplayEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Display channel closed");
        }
    }
}
