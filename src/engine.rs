use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::protocol;
use crate::router::{EvaluationBatch, PendingRequest, ResponseRouter};
use crate::types::{Difficulty, PositionKey, RequestId, RequestKind, SearchRequest};
use log::{debug, info, warn};
use shakmaty::uci::Uci;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Notify};

/// Lets another task interrupt anyone waiting on the engine.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) { self.0.send_replace(true); }
}

/// The engine subprocess and the conversation with it.
///
/// Requests are fire-and-forget: each one records what reply it expects and
/// writes its commands. Replies are collected separately, either by polling
/// (`get_*`) or by suspending (`wait_*`).
pub struct EngineProcess {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    router: ResponseRouter,
    wake: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    next_id: u64,
}

impl EngineProcess {
    pub async fn spawn(config: &EngineConfig, capacity: usize) -> Result<Self, EngineError> {
        let mut cmd = Command::new(&config.path);
        if let Some(args) = &config.args { cmd.args(args); }
        if let Some(dir) = &config.working_directory { cmd.current_dir(dir); }
        cmd.stdin(Stdio::piped())
           .stdout(Stdio::piped())
           .stderr(Stdio::null())
           .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn { path: config.path.clone(), source })?;
        let stdin = child.stdin.take().ok_or(EngineError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(EngineError::NoStdout)?;
        info!("Spawned engine {} (pid {:?})", config.path, child.id());

        let capacity = capacity.max(1);
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(capacity);
        let (lines_tx, lines_rx) = mpsc::channel::<String>(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());

        // Writer task
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(cmd) = stdin_rx.recv().await {
                debug!("> {}", cmd.replace('\n', " | "));
                if writer.write_all(cmd.as_bytes()).await.is_err() { break; }
                if !cmd.ends_with('\n') && writer.write_all(b"\n").await.is_err() { break; }
                if writer.flush().await.is_err() { break; }
            }
        });

        tokio::spawn(read_responses(stdout, lines_tx, wake.clone()));

        Ok(Self {
            child,
            stdin_tx,
            router: ResponseRouter::new(lines_rx, shutdown_rx),
            wake,
            shutdown: Arc::new(shutdown),
            next_id: 0,
        })
    }

    /// Asks for the engine's move in `request`'s position.
    pub async fn request_best_move(&mut self, request: &SearchRequest, difficulty: Difficulty) -> Result<RequestId, EngineError> {
        self.issue(request, RequestKind::BestMove, protocol::go_command(difficulty)).await
    }

    /// Asks for a score of every candidate move in `request`'s position.
    pub async fn request_evaluation(&mut self, request: &SearchRequest) -> Result<RequestId, EngineError> {
        self.issue(request, RequestKind::Evaluation, protocol::eval_command()).await
    }

    async fn issue(&mut self, request: &SearchRequest, kind: RequestKind, go: String) -> Result<RequestId, EngineError> {
        // Nothing can answer once the output has closed, even if stdin still accepts writes.
        self.router.check_connection()?;
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.router.expect(PendingRequest { id, position: request.position.clone(), kind });
        let cmd = format!("{}\n{}", protocol::position_command(&request.start_fen, &request.moves), go);
        if self.stdin_tx.send(cmd).await.is_err() {
            self.router.retract(id);
            return Err(EngineError::Disconnected);
        }
        debug!("Issued request {} ({:?})", id, kind);
        Ok(id)
    }

    pub fn get_best_move(&mut self, position: &PositionKey) -> Result<Option<Uci>, EngineError> {
        self.router.get_best_move(position)
    }

    pub fn get_evaluation_batch(&mut self, position: &PositionKey) -> Result<Option<EvaluationBatch>, EngineError> {
        self.router.get_evaluation_batch(position)
    }

    pub async fn wait_best_move(&mut self, position: &PositionKey) -> Result<Uci, EngineError> {
        self.router.wait_best_move(position).await
    }

    pub async fn wait_evaluation(&mut self, position: &PositionKey) -> Result<EvaluationBatch, EngineError> {
        self.router.wait_evaluation(position).await
    }

    pub fn has_pending(&self, position: &PositionKey, kind: RequestKind) -> bool {
        self.router.has_pending(position, kind)
    }

    pub fn is_disconnected(&self) -> bool { self.router.is_disconnected() }

    pub fn check_connection(&mut self) -> Result<(), EngineError> { self.router.check_connection() }

    pub fn discard_resolved(&mut self, kind: RequestKind) { self.router.discard_resolved(kind) }

    pub fn resolved(&self, kind: RequestKind) -> usize { self.router.resolved(kind) }

    pub fn pending_requests(&self) -> usize { self.router.pending().count() }

    /// Raised whenever a `bestmove` or `done` line arrives, and when the
    /// engine's output closes.
    pub fn wake_signal(&self) -> Arc<Notify> { self.wake.clone() }

    pub fn shutdown_handle(&self) -> ShutdownHandle { ShutdownHandle(self.shutdown.clone()) }

    /// Kills the subprocess. There is no shutdown handshake.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill engine: {}", e);
        }
        info!("Engine stopped");
    }
}

/// Forwards every non-empty line of engine output until the stream closes.
async fn read_responses<R: AsyncRead + Unpin>(stdout: R, lines_tx: mpsc::Sender<String>, wake: Arc<Notify>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                debug!("< {}", line);
                let wakes = protocol::is_wake_line(line);
                if lines_tx.send(line.to_string()).await.is_err() { break; }
                if wakes { wake.notify_one(); }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading from engine: {}", e);
                break;
            }
        }
    }
    warn!("Engine output closed");
    drop(lines_tx);
    wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn reader_forwards_trimmed_lines_and_wakes_on_terminal_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let wake = Arc::new(Notify::new());
        let input: &[u8] = b"  info depth 1  \n\nmove e2e4 10\nbestmove e2e4\n";
        read_responses(input, tx, wake.clone()).await;

        let mut got = Vec::new();
        while let Some(line) = rx.recv().await { got.push(line); }
        assert_eq!(got, vec!["info depth 1", "move e2e4 10", "bestmove e2e4"]);
        timeout(Duration::from_secs(1), wake.notified()).await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let config = EngineConfig { path: "/nonexistent/engine-binary".to_string(), args: None, working_directory: None };
        assert!(matches!(EngineProcess::spawn(&config, 8).await, Err(EngineError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scripted_engine_round_trip() {
        let script = "read pos; read go; echo \"bestmove e2e4\"; read pos; read go; echo \"move d2d4 30\"; echo done; sleep 5";
        let config = EngineConfig { path: "sh".to_string(), args: Some(vec!["-c".to_string(), script.to_string()]), working_directory: None };
        let mut engine = EngineProcess::spawn(&config, 8).await.unwrap();
        let request = SearchRequest { position: PositionKey::new("p0"), start_fen: crate::game::START_FEN.to_string(), moves: vec![] };

        let first = engine.request_best_move(&request, Difficulty::Impossible).await.unwrap();
        let m = timeout(Duration::from_secs(5), engine.wait_best_move(&request.position)).await.unwrap().unwrap();
        assert_eq!(m, "e2e4".parse::<Uci>().unwrap());

        let second = engine.request_evaluation(&request).await.unwrap();
        assert!(second > first);
        let batch = timeout(Duration::from_secs(5), engine.wait_evaluation(&request.position)).await.unwrap().unwrap();
        assert_eq!(batch, vec![("d2d4".parse::<Uci>().unwrap(), 30)]);
        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_exit_surfaces_as_disconnect() {
        let config = EngineConfig { path: "sh".to_string(), args: Some(vec!["-c".to_string(), "read pos; exit 0".to_string()]), working_directory: None };
        let mut engine = EngineProcess::spawn(&config, 8).await.unwrap();
        let request = SearchRequest { position: PositionKey::new("p0"), start_fen: crate::game::START_FEN.to_string(), moves: vec![] };
        engine.request_best_move(&request, Difficulty::Easy).await.unwrap();
        let result = timeout(Duration::from_secs(5), engine.wait_best_move(&request.position)).await.unwrap();
        assert!(matches!(result, Err(EngineError::Disconnected)));
        assert!(engine.is_disconnected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn requests_after_disconnect_are_refused() {
        let config = EngineConfig { path: "sh".to_string(), args: Some(vec!["-c".to_string(), "exit 0".to_string()]), working_directory: None };
        let mut engine = EngineProcess::spawn(&config, 8).await.unwrap();
        timeout(Duration::from_secs(5), engine.wake_signal().notified()).await.unwrap();
        let request = SearchRequest { position: PositionKey::new("p0"), start_fen: crate::game::START_FEN.to_string(), moves: vec![] };
        assert!(matches!(engine.request_best_move(&request, Difficulty::Easy).await, Err(EngineError::Disconnected)));
        assert!(matches!(engine.request_evaluation(&request).await, Err(EngineError::Disconnected)));
        assert_eq!(engine.pending_requests(), 0);
    }
}
