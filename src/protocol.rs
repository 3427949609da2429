//! Text protocol spoken with the engine subprocess.
//!
//! Four commands go out (`position fen .. moves ..`, `go`, `go diff <n>`,
//! `go eval`) and three response shapes come back (`bestmove <uci>`,
//! `move <uci> <score>`, `done`). Anything else is ignored.

use crate::types::Difficulty;
use shakmaty::uci::Uci;

pub const BESTMOVE_MARKER: &str = "bestmove";
pub const DONE_MARKER: &str = "done";

/// Builds the `position` command replaying `moves` from `start_fen`.
pub fn position_command<S: AsRef<str>>(start_fen: &str, moves: &[S]) -> String {
    let mut pos_cmd = format!("position fen {} moves", start_fen);
    for m in moves { pos_cmd.push(' '); pos_cmd.push_str(m.as_ref()); }
    pos_cmd
}

pub fn go_command(difficulty: Difficulty) -> String {
    match difficulty {
        Difficulty::Impossible => "go".to_string(),
        other => format!("go diff {}", other.tier()),
    }
}

pub fn eval_command() -> String { "go eval".to_string() }

/// Lines that should wake a consumer waiting on the engine.
pub fn is_wake_line(line: &str) -> bool {
    line.contains(BESTMOVE_MARKER) || line.contains(DONE_MARKER)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseLine {
    /// `None` when the engine answered without a usable move, e.g. `bestmove (none)`.
    BestMove(Option<Uci>),
    Scored(Uci, i32),
    Done,
    Other,
}

impl ResponseLine {
    pub fn parse(line: &str) -> Self {
        if let Some(idx) = line.find(BESTMOVE_MARKER) {
            let m = line[idx + BESTMOVE_MARKER.len()..]
                .split_whitespace()
                .next()
                .and_then(|m| m.parse::<Uci>().ok());
            return ResponseLine::BestMove(m);
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.first() == Some(&"move") {
            if parts.len() < 3 { return ResponseLine::Other; }
            return match (parts[1].parse::<Uci>(), parts[2].parse::<i32>()) {
                (Ok(m), Ok(score)) => ResponseLine::Scored(m, score),
                _ => ResponseLine::Other,
            };
        }
        if line.contains(DONE_MARKER) { ResponseLine::Done } else { ResponseLine::Other }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uci(s: &str) -> Uci { s.parse().unwrap() }

    #[test]
    fn renders_commands() {
        assert_eq!(position_command::<&str>("8/8/8/8/8/8/8/K6k w - - 0 1", &[]), "position fen 8/8/8/8/8/8/8/K6k w - - 0 1 moves");
        assert_eq!(
            position_command("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", &["e2e4", "e7e5"]),
            "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 moves e2e4 e7e5"
        );
        assert_eq!(go_command(Difficulty::Impossible), "go");
        assert_eq!(go_command(Difficulty::Easy), "go diff 0");
        assert_eq!(go_command(Difficulty::Hard), "go diff 2");
        assert_eq!(eval_command(), "go eval");
    }

    #[test]
    fn classifies_response_lines() {
        assert_eq!(ResponseLine::parse("bestmove e2e4"), ResponseLine::BestMove(Some(uci("e2e4"))));
        assert_eq!(ResponseLine::parse("bestmove e7e8q ponder a2a3"), ResponseLine::BestMove(Some(uci("e7e8q"))));
        assert_eq!(ResponseLine::parse("move g1f3 -12"), ResponseLine::Scored(uci("g1f3"), -12));
        assert_eq!(ResponseLine::parse("done"), ResponseLine::Done);
        assert_eq!(ResponseLine::parse("info depth 3"), ResponseLine::Other);
    }

    #[test]
    fn malformed_lines_are_other() {
        assert_eq!(ResponseLine::parse("bestmo"), ResponseLine::Other);
        assert_eq!(ResponseLine::parse("move e2e4"), ResponseLine::Other);
        assert_eq!(ResponseLine::parse("move e2e4 fifty"), ResponseLine::Other);
    }

    #[test]
    fn moveless_bestmove_still_answers() {
        assert_eq!(ResponseLine::parse("bestmove"), ResponseLine::BestMove(None));
        assert_eq!(ResponseLine::parse("bestmove (none)"), ResponseLine::BestMove(None));
        assert_eq!(ResponseLine::parse("bestmove zz"), ResponseLine::BestMove(None));
    }

    #[test]
    fn only_terminal_lines_wake() {
        assert!(is_wake_line("bestmove e2e4"));
        assert!(is_wake_line("done"));
        assert!(!is_wake_line("move e2e4 50"));
    }
}
