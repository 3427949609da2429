//! Terminal front-end: type moves in engine notation (`e2e4`), or one of
//! `new`, `fen <FEN>`, `pgn <file>`, `undo`, `back`, `forward`, `latest`,
//! `mode <m>`, `difficulty <d>`, `export fen|pgn`, `status`, `quit`.
//! Display notifications are printed as JSON lines.

use anyhow::{Context, Result};
use chess_trainer_lib::{AppConfig, Browse, Difficulty, DisplayEvent, GameSetup, Mode, Session, SessionError, Side};
use clap::{Parser, ValueEnum};
use log::{error, info};
use shakmaty::uci::Uci;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

#[derive(Parser)]
#[command(name = "chess-trainer", version, about = "Play or train against an external chess engine")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine executable, overrides the configuration file
    #[arg(short, long)]
    engine: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long, value_enum)]
    difficulty: Option<Difficulty>,

    #[arg(long, value_enum)]
    side: Option<Side>,
}

impl Cli {
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(engine) = self.engine { config.engine.path = engine; }
        if let Some(mode) = self.mode { config.mode = mode; }
        if let Some(difficulty) = self.difficulty { config.difficulty = difficulty; }
        if let Some(side) = self.side { config.human_side = side; }
        Ok(config)
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle(session: &mut Session, line: &str) -> Result<Flow, SessionError> {
    let (cmd, arg) = line.split_once(' ').map_or((line, ""), |(c, a)| (c, a.trim()));
    match cmd {
        "quit" | "exit" => return Ok(Flow::Quit),
        "new" => session.new_game(GameSetup::Start).await?,
        "fen" => session.new_game(GameSetup::Fen(arg.to_string())).await?,
        "pgn" => match std::fs::read_to_string(arg) {
            Ok(pgn) => session.new_game(GameSetup::Pgn(pgn)).await?,
            Err(e) => println!("cannot read {}: {}", arg, e),
        },
        "undo" => { session.undo().await?; }
        "back" => { session.browse(Browse::Back).await; }
        "forward" => { session.browse(Browse::Forward).await; }
        "latest" => { session.browse(Browse::Latest).await; }
        "mode" => match Mode::from_str(arg, true) {
            Ok(mode) => session.set_mode(mode).await?,
            Err(e) => println!("{}", e),
        },
        "difficulty" => match Difficulty::from_str(arg, true) {
            Ok(difficulty) => session.set_difficulty(difficulty),
            Err(e) => println!("{}", e),
        },
        "status" => {
            let grade = session.trainer().record().and_then(|r| r.last_tier).map(|t| t.value());
            println!(
                "mode {:?}, difficulty {:?}, ply {}, finished {}, last grade {:?}",
                session.mode(), session.difficulty(), session.game().ply(), session.is_finished(), grade
            );
        }
        "export" if arg == "pgn" => print!("{}", session.export_pgn()),
        "export" => println!("{}", session.export_fen()),
        _ => match line.parse::<Uci>() {
            Ok(m) => { session.human_move(&m).await?; }
            Err(_) => println!("unknown command: {}", line),
        },
    }
    Ok(Flow::Continue)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Cli::parse().into_config()?;
    let has_clock = config.time_control.is_some();

    let (events_tx, mut events_rx) = mpsc::channel::<DisplayEvent>(100);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to encode event: {}", e),
            }
        }
    });

    let mut session = Session::start(config, events_tx).await.context("Failed to start engine session")?;
    let wake = session.wake_signal();
    let shutdown = session.shutdown_handle();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() { continue; }
                match handle(&mut session, line).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("{}", e),
                }
            }
            _ = wake.notified() => {
                if let Err(e) = session.poll().await { println!("{}", e); }
            }
            _ = ticker.tick(), if has_clock => session.tick().await,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    shutdown.trigger();
    session.shutdown().await;
    Ok(())
}
