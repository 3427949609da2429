use crate::error::GameError;
use crate::types::{OutcomeTag, PositionKey, SearchRequest};
use chrono::NaiveDate;
use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Outcome, Position};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

pub fn result_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Decisive { winner: Color::White } => "1-0",
        Outcome::Decisive { winner: Color::Black } => "0-1",
        Outcome::Draw => "1/2-1/2",
    }
}

/// The moves of one game and the positions they pass through.
///
/// Legality and outcomes come from shakmaty; this type only keeps the
/// bookkeeping the engine conversation needs.
#[derive(Clone, Debug)]
pub struct GameState {
    start_fen: String,
    moves: Vec<Uci>,
    // history[i] is the position before moves[i]; the last entry is the current board.
    history: Vec<Chess>,
    human: Color,
}

impl GameState {
    pub fn new(human: Color) -> Self { Self::from_position(Chess::default(), human) }

    pub fn from_fen(fen: &str, human: Color) -> Result<Self, GameError> {
        let setup: Fen = fen.trim().parse().map_err(|e| GameError::InvalidFen(format!("{}", e)))?;
        let pos: Chess = setup.into_position(CastlingMode::Standard)
            .map_err(|e| GameError::InvalidFen(format!("{}", e)))?;
        Ok(Self::from_position(pos, human))
    }

    /// Loads the first game of a PGN document, honouring a `[FEN]` header.
    /// Variations are skipped.
    pub fn from_pgn(pgn: &str, human: Color) -> Result<Self, GameError> {
        let mut reader = BufferedReader::new_cursor(pgn.as_bytes());
        let mut visitor = MainLine::default();
        let line = reader.read_game(&mut visitor)
            .map_err(|e| GameError::InvalidPgn(e.to_string()))?
            .ok_or_else(|| GameError::InvalidPgn("no game found".to_string()))?;

        let mut game = match line.fen {
            Some(fen) => Self::from_fen(&fen, human).map_err(|e| GameError::InvalidPgn(e.to_string()))?,
            None => Self::new(human),
        };
        for san_plus in line.sans {
            let m = san_plus.san.to_move(game.board())
                .map_err(|_| GameError::InvalidPgn(format!("illegal move {} after {} plies", san_plus, game.moves.len())))?;
            game.push(&m);
        }
        Ok(game)
    }

    fn from_position(pos: Chess, human: Color) -> Self {
        Self { start_fen: fen_of(&pos), moves: Vec::new(), history: vec![pos], human }
    }

    pub fn board(&self) -> &Chess {
        // history is never empty: it always holds the starting position.
        &self.history[self.history.len() - 1]
    }

    pub fn start_fen(&self) -> &str { &self.start_fen }
    pub fn moves(&self) -> &[Uci] { &self.moves }
    pub fn ply(&self) -> usize { self.moves.len() }
    pub fn human(&self) -> Color { self.human }
    pub fn turn(&self) -> Color { self.board().turn() }
    pub fn is_human_turn(&self) -> bool { self.turn() == self.human }
    pub fn fen(&self) -> String { fen_of(self.board()) }
    pub fn position_key(&self) -> PositionKey { PositionKey::new(self.fen()) }
    pub fn outcome(&self) -> Option<Outcome> { self.board().outcome() }

    pub fn outcome_tag(&self, outcome: Outcome) -> OutcomeTag {
        match outcome {
            Outcome::Draw => OutcomeTag::Draw,
            Outcome::Decisive { winner } if winner == self.human => OutcomeTag::Win,
            Outcome::Decisive { .. } => OutcomeTag::Loss,
        }
    }

    pub fn search_request(&self) -> SearchRequest {
        SearchRequest {
            position: self.position_key(),
            start_fen: self.start_fen.clone(),
            moves: self.moves.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Plays `m` if legal and returns the outcome it produced, if any.
    /// An illegal move leaves the game untouched.
    pub fn apply_move(&mut self, m: &Uci) -> Result<Option<Outcome>, GameError> {
        if self.outcome().is_some() { return Err(GameError::GameOver); }
        let mv = m.to_move(self.board()).map_err(|_| GameError::IllegalMove(m.to_string()))?;
        self.push(&mv);
        Ok(self.outcome())
    }

    fn push(&mut self, mv: &shakmaty::Move) {
        let mut next = self.board().clone();
        next.play_unchecked(mv);
        self.moves.push(Uci::from_move(mv, CastlingMode::Standard));
        self.history.push(next);
    }

    /// Takes back the last move without re-checking the resulting position.
    pub fn undo(&mut self) -> Result<Uci, GameError> {
        let last = self.moves.pop().ok_or(GameError::NothingToUndo)?;
        self.history.pop();
        Ok(last)
    }

    /// FEN after `ply` moves, for browsing the move list.
    pub fn fen_at(&self, ply: usize) -> Option<String> { self.history.get(ply).map(fen_of) }

    /// Replays the move list from the starting FEN.
    pub fn replay(&self) -> Result<Chess, GameError> {
        let mut pos = Self::from_fen(&self.start_fen, self.human)?.board().clone();
        for m in &self.moves {
            let mv = m.to_move(&pos).map_err(|_| GameError::IllegalMove(m.to_string()))?;
            pos.play_unchecked(&mv);
        }
        Ok(pos)
    }

    pub fn san_moves(&self) -> Vec<String> {
        self.moves.iter().zip(&self.history)
            .filter_map(|(m, before)| {
                let mv = m.to_move(before).ok()?;
                let mut pos = before.clone();
                Some(SanPlus::from_move_and_play_unchecked(&mut pos, &mv).to_string())
            })
            .collect()
    }

    pub fn to_pgn(&self, date: NaiveDate) -> String {
        let result = self.outcome().map_or("*", result_str);
        let (white, black) = if self.human == Color::White { ("Human", "Engine") } else { ("Engine", "Human") };
        let mut pgn = String::new();
        pgn.push_str("[Event \"Casual game\"]\n[Site \"?\"]\n");
        pgn.push_str(&format!("[Date \"{}\"]\n[Round \"-\"]\n", date.format("%Y.%m.%d")));
        pgn.push_str(&format!("[White \"{}\"]\n[Black \"{}\"]\n[Result \"{}\"]\n", white, black, result));
        if self.start_fen != START_FEN {
            pgn.push_str(&format!("[SetUp \"1\"]\n[FEN \"{}\"]\n", self.start_fen));
        }
        pgn.push('\n');

        let mut number: u32 = self.start_fen.split_whitespace().nth(5).and_then(|n| n.parse().ok()).unwrap_or(1);
        let mut turn = self.history[0].turn();
        let mut tokens = Vec::new();
        for (i, san) in self.san_moves().into_iter().enumerate() {
            match turn {
                Color::White => tokens.push(format!("{}. {}", number, san)),
                Color::Black if i == 0 => tokens.push(format!("{}... {}", number, san)),
                Color::Black => tokens.push(san),
            }
            if turn == Color::Black { number += 1; }
            turn = !turn;
        }
        tokens.push(result.to_string());
        pgn.push_str(&tokens.join(" "));
        pgn.push('\n');
        pgn
    }
}

#[derive(Default)]
struct MainLine {
    fen: Option<String>,
    sans: Vec<SanPlus>,
}

impl Visitor for MainLine {
    type Result = MainLine;

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        if key == b"FEN" {
            self.fen = Some(String::from_utf8_lossy(value.as_bytes()).to_string());
        }
    }

    fn san(&mut self, san_plus: SanPlus) { self.sans.push(san_plus); }

    fn begin_variation(&mut self) -> Skip { Skip(true) }

    fn end_game(&mut self) -> Self::Result { std::mem::take(self) }
}
