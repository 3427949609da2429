//! Scripted engine for tests: legal moves from shakmaty, scores from a
//! one-ply material count.

use rand::prelude::IndexedRandom;
use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Move, Position, Role};
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

fn role_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 100,
        Role::Knight | Role::Bishop => 300,
        Role::Rook => 500,
        Role::Queen => 900,
        Role::King => 0,
    }
}

fn score(pos: &Chess, m: &Move) -> i32 {
    let mut after = pos.clone();
    after.play_unchecked(m);
    if after.is_checkmate() { return 10_000; }
    let mut score = m.capture().map_or(0, role_value);
    if let Some(promoted) = m.promotion() { score += role_value(promoted) - role_value(Role::Pawn); }
    if after.is_check() { score += 30; }
    score
}

fn scored_moves(pos: &Chess) -> Vec<(Uci, i32)> {
    pos.legal_moves().iter()
        .map(|m| (Uci::from_move(m, CastlingMode::Standard), score(pos, m)))
        .collect()
}

fn parse_position(parts: &[&str]) -> Option<Chess> {
    let (mut pos, rest): (Chess, &[&str]) = match parts.get(1) {
        Some(&"startpos") => (Chess::default(), &parts[2..]),
        Some(&"fen") => {
            let end = parts.iter().position(|p| *p == "moves").unwrap_or(parts.len());
            let fen: Fen = parts[2..end].join(" ").parse().ok()?;
            (fen.into_position(CastlingMode::Standard).ok()?, &parts[end..])
        }
        _ => return None,
    };
    for token in rest.iter().skip_while(|t| **t == "moves") {
        let m = token.parse::<Uci>().ok()?.to_move(&pos).ok()?;
        pos.play_unchecked(&m);
    }
    Some(pos)
}

fn main() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let delay = std::env::var("MOCK_ENGINE_DELAY_MS").ok()
        .and_then(|d| d.parse().ok())
        .map(Duration::from_millis);

    let mut pos = Chess::default();

    for cmd in stdin.lock().lines().map_while(Result::ok) {
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        if parts.is_empty() { continue; }
        if let Some(delay) = delay { thread::sleep(delay); }

        match parts[0] {
            "position" => match parse_position(&parts) {
                Some(p) => pos = p,
                None => println!("info string bad position"),
            },
            "go" if parts.get(1) == Some(&"eval") => {
                for (m, s) in scored_moves(&pos) { println!("move {} {}", m, s); }
                println!("done");
            },
            "go" => {
                let mut moves = scored_moves(&pos);
                // Stable sort keeps generation order among equal scores.
                moves.sort_by(|a, b| b.1.cmp(&a.1));
                let tier: usize = parts.get(2).and_then(|n| n.parse().ok()).unwrap_or(3).min(3);
                let top = &moves[..moves.len().min(4 - tier)];
                println!("info depth 1 score cp {}", top.first().map_or(0, |m| m.1));
                match top.choose(&mut rand::rng()) {
                    Some((m, _)) => println!("bestmove {}", m),
                    None => println!("bestmove 0000"),
                }
            },
            "quit" => break,
            _ => {}
        }
        if stdout.flush().is_err() { break; }
    }
}
