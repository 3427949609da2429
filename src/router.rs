use crate::error::EngineError;
use crate::protocol::ResponseLine;
use crate::types::{PositionKey, RequestId, RequestKind};
use log::{debug, warn};
use shakmaty::uci::Uci;
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TryRecvError;

/// A command the engine has not answered yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub position: PositionKey,
    pub kind: RequestKind,
}

/// Scored candidates in the order the engine reported them.
pub type EvaluationBatch = Vec<(Uci, i32)>;

#[derive(Debug)]
struct Resolved<T> {
    id: RequestId,
    position: PositionKey,
    value: T,
}

enum Wake {
    Line(Option<String>),
    Shutdown,
}

/// Matches engine output to the requests that produced it.
///
/// Replies are attributed to pending requests in send order. A reply is
/// handed out only for the position it was requested for; replies for any
/// other position are dropped together with their pending slot.
pub struct ResponseRouter {
    lines: mpsc::Receiver<String>,
    shutdown: watch::Receiver<bool>,
    pending: VecDeque<PendingRequest>,
    batch: EvaluationBatch,
    moves: VecDeque<Resolved<Uci>>,
    evaluations: VecDeque<Resolved<EvaluationBatch>>,
    disconnected: bool,
}

impl ResponseRouter {
    pub fn new(lines: mpsc::Receiver<String>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            lines,
            shutdown,
            pending: VecDeque::new(),
            batch: Vec::new(),
            moves: VecDeque::new(),
            evaluations: VecDeque::new(),
            disconnected: false,
        }
    }

    pub fn expect(&mut self, request: PendingRequest) { self.pending.push_back(request); }

    /// Forgets the most recent expectation, used when its command never reached the engine.
    pub fn retract(&mut self, id: RequestId) {
        if self.pending.back().map(|p| p.id) == Some(id) { self.pending.pop_back(); }
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingRequest> { self.pending.iter() }

    pub fn is_disconnected(&self) -> bool { self.disconnected }

    /// Routes whatever output is buffered and reports whether the engine's
    /// output has closed.
    pub fn check_connection(&mut self) -> Result<(), EngineError> {
        self.drain();
        if self.disconnected { Err(EngineError::Disconnected) } else { Ok(()) }
    }

    /// Throws away resolved replies of `kind` nobody is going to ask for.
    pub fn discard_resolved(&mut self, kind: RequestKind) {
        self.drain();
        let dropped = match kind {
            RequestKind::BestMove => std::mem::take(&mut self.moves).len(),
            RequestKind::Evaluation => std::mem::take(&mut self.evaluations).len(),
        };
        if dropped > 0 { debug!("Discarded {} unread {:?} replies", dropped, kind); }
    }

    pub fn resolved(&self, kind: RequestKind) -> usize {
        match kind {
            RequestKind::BestMove => self.moves.len(),
            RequestKind::Evaluation => self.evaluations.len(),
        }
    }

    /// Non-blocking: drains buffered lines and returns the engine's move for
    /// `position` if one has arrived.
    pub fn get_best_move(&mut self, position: &PositionKey) -> Result<Option<Uci>, EngineError> {
        self.drain();
        while let Some(resolved) = self.moves.pop_front() {
            if resolved.position == *position {
                debug!("Request {} answered with bestmove {}", resolved.id, resolved.value);
                return Ok(Some(resolved.value));
            }
            debug!("Dropping stale bestmove {} for request {}", resolved.value, resolved.id);
        }
        self.unanswered(position, RequestKind::BestMove)
    }

    /// Non-blocking: drains buffered lines and returns the evaluation batch
    /// for `position` if a complete one has arrived.
    pub fn get_evaluation_batch(&mut self, position: &PositionKey) -> Result<Option<EvaluationBatch>, EngineError> {
        self.drain();
        while let Some(resolved) = self.evaluations.pop_front() {
            if resolved.position == *position {
                debug!("Request {} answered with {} scored moves", resolved.id, resolved.value.len());
                return Ok(Some(resolved.value));
            }
            debug!("Dropping stale evaluation for request {}", resolved.id);
        }
        self.unanswered(position, RequestKind::Evaluation)
    }

    pub async fn wait_best_move(&mut self, position: &PositionKey) -> Result<Uci, EngineError> {
        loop {
            if let Some(m) = self.get_best_move(position)? { return Ok(m); }
            self.require_pending(position, RequestKind::BestMove)?;
            self.suspend().await?;
        }
    }

    pub async fn wait_evaluation(&mut self, position: &PositionKey) -> Result<EvaluationBatch, EngineError> {
        loop {
            if let Some(batch) = self.get_evaluation_batch(position)? { return Ok(batch); }
            self.require_pending(position, RequestKind::Evaluation)?;
            self.suspend().await?;
        }
    }

    pub fn has_pending(&self, position: &PositionKey, kind: RequestKind) -> bool {
        self.pending.iter().any(|p| p.kind == kind && p.position == *position)
    }

    fn require_pending(&self, position: &PositionKey, kind: RequestKind) -> Result<(), EngineError> {
        if self.has_pending(position, kind) { Ok(()) } else { Err(EngineError::NothingPending(position.clone())) }
    }

    fn unanswered<T>(&self, position: &PositionKey, kind: RequestKind) -> Result<Option<T>, EngineError> {
        if self.disconnected && self.has_pending(position, kind) {
            return Err(EngineError::Disconnected);
        }
        Ok(None)
    }

    async fn suspend(&mut self) -> Result<(), EngineError> {
        if *self.shutdown.borrow() { return Err(EngineError::Shutdown); }
        let wake = tokio::select! {
            line = self.lines.recv() => Wake::Line(line),
            _ = self.shutdown.changed() => Wake::Shutdown,
        };
        match wake {
            Wake::Line(Some(line)) => self.route(&line),
            Wake::Line(None) => self.disconnected = true,
            Wake::Shutdown => return Err(EngineError::Shutdown),
        }
        Ok(())
    }

    fn drain(&mut self) {
        loop {
            match self.lines.try_recv() {
                Ok(line) => self.route(&line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn route(&mut self, line: &str) {
        match ResponseLine::parse(line) {
            ResponseLine::Other => debug!("Ignoring engine line: {}", line),
            ResponseLine::Scored(m, score) => self.batch.push((m, score)),
            ResponseLine::Done => {
                let batch = std::mem::take(&mut self.batch);
                if let Some(request) = self.pop_expected(RequestKind::Evaluation) {
                    if batch.is_empty() {
                        debug!("Evaluation for request {} was empty", request.id);
                    } else {
                        self.evaluations.push_back(Resolved { id: request.id, position: request.position, value: batch });
                    }
                }
            }
            ResponseLine::BestMove(m) => {
                let Some(request) = self.pop_expected(RequestKind::BestMove) else { return };
                match m {
                    Some(value) => self.moves.push_back(Resolved { id: request.id, position: request.position, value }),
                    None => warn!("Engine answered request {} without a move: {}", request.id, line),
                }
            }
        }
    }

    fn pop_expected(&mut self, kind: RequestKind) -> Option<PendingRequest> {
        match self.pending.pop_front() {
            None => {
                warn!("Unsolicited {:?} reply from engine", kind);
                None
            }
            Some(request) if request.kind != kind => {
                warn!("Engine answered request {} ({:?}) with a {:?} reply; dropping both", request.id, request.kind, kind);
                None
            }
            Some(request) => Some(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Harness {
        lines: mpsc::Sender<String>,
        shutdown: Arc<watch::Sender<bool>>,
        router: ResponseRouter,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            let (lines, rx) = mpsc::channel(64);
            let (shutdown, shutdown_rx) = watch::channel(false);
            Self { lines, shutdown: Arc::new(shutdown), router: ResponseRouter::new(rx, shutdown_rx), next_id: 0 }
        }

        fn expect(&mut self, fen: &str, kind: RequestKind) {
            self.next_id += 1;
            self.router.expect(PendingRequest { id: RequestId(self.next_id), position: key(fen), kind });
        }

        fn feed(&self, lines: &[&str]) {
            for line in lines { self.lines.try_send(line.to_string()).unwrap(); }
        }
    }

    fn key(s: &str) -> PositionKey { PositionKey::new(s) }
    fn uci(s: &str) -> Uci { s.parse().unwrap() }

    #[test]
    fn resolves_best_move_for_queried_position() {
        let mut h = Harness::new();
        h.expect("start", RequestKind::BestMove);
        h.feed(&["info depth 1", "bestmove e2e4"]);
        assert_eq!(h.router.get_best_move(&key("start")).unwrap(), Some(uci("e2e4")));
        assert_eq!(h.router.pending().count(), 0);
    }

    #[test]
    fn fifo_attribution_across_queued_requests() {
        let mut h = Harness::new();
        h.expect("a", RequestKind::BestMove);
        h.expect("b", RequestKind::BestMove);
        h.expect("c", RequestKind::BestMove);
        h.feed(&["bestmove a2a3", "bestmove b2b3", "bestmove c2c3"]);
        assert_eq!(h.router.get_best_move(&key("a")).unwrap(), Some(uci("a2a3")));
        assert_eq!(h.router.get_best_move(&key("b")).unwrap(), Some(uci("b2b3")));
        assert_eq!(h.router.get_best_move(&key("c")).unwrap(), Some(uci("c2c3")));
    }

    #[test]
    fn stale_reply_does_not_leak_into_newer_query() {
        let mut h = Harness::new();
        h.expect("a", RequestKind::BestMove);
        h.expect("b", RequestKind::BestMove);
        h.feed(&["bestmove e2e4"]);
        assert_eq!(h.router.get_best_move(&key("b")).unwrap(), None);
        h.feed(&["bestmove d2d4"]);
        assert_eq!(h.router.get_best_move(&key("b")).unwrap(), Some(uci("d2d4")));
        assert_eq!(h.router.get_best_move(&key("a")).unwrap(), None);
    }

    #[test]
    fn evaluation_batch_collects_until_done() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::Evaluation);
        h.feed(&["move e2e4 50", "move d2d4 65"]);
        assert_eq!(h.router.get_evaluation_batch(&key("p")).unwrap(), None);
        h.feed(&["move g1f3 10", "done"]);
        let batch = h.router.get_evaluation_batch(&key("p")).unwrap().unwrap();
        assert_eq!(batch, vec![(uci("e2e4"), 50), (uci("d2d4"), 65), (uci("g1f3"), 10)]);
    }

    #[test]
    fn stale_done_resets_batch() {
        let mut h = Harness::new();
        h.expect("old", RequestKind::Evaluation);
        h.expect("new", RequestKind::Evaluation);
        h.feed(&["move e2e4 50", "done", "move d2d4 20", "done"]);
        let batch = h.router.get_evaluation_batch(&key("new")).unwrap().unwrap();
        assert_eq!(batch, vec![(uci("d2d4"), 20)]);
    }

    #[test]
    fn empty_batch_is_not_returned() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::Evaluation);
        h.feed(&["done"]);
        assert_eq!(h.router.get_evaluation_batch(&key("p")).unwrap(), None);
        assert_eq!(h.router.pending().count(), 0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        h.feed(&["bestmo", "move e2", "garbage line", "bestmove g1f3"]);
        assert_eq!(h.router.get_best_move(&key("p")).unwrap(), Some(uci("g1f3")));
    }

    #[test]
    fn draining_empty_queue_changes_nothing() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        assert_eq!(h.router.get_best_move(&key("p")).unwrap(), None);
        assert_eq!(h.router.get_best_move(&key("p")).unwrap(), None);
        assert_eq!(h.router.pending().count(), 1);
    }

    #[test]
    fn kind_mismatch_drops_reply() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::Evaluation);
        h.expect("p", RequestKind::BestMove);
        h.feed(&["bestmove e2e4", "bestmove d2d4"]);
        assert_eq!(h.router.get_best_move(&key("p")).unwrap(), Some(uci("d2d4")));
    }

    #[test]
    fn mixed_requests_resolve_independently() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::Evaluation);
        h.expect("q", RequestKind::BestMove);
        h.feed(&["move e2e4 5", "done", "bestmove e7e5"]);
        assert_eq!(h.router.get_best_move(&key("q")).unwrap(), Some(uci("e7e5")));
        assert_eq!(h.router.get_evaluation_batch(&key("p")).unwrap(), Some(vec![(uci("e2e4"), 5)]));
    }

    #[test]
    fn closed_stream_reports_disconnect() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        let Harness { lines, mut router, shutdown: _keep, .. } = h;
        drop(lines);
        assert!(matches!(router.get_best_move(&key("p")), Err(EngineError::Disconnected)));
        assert!(router.is_disconnected());
    }

    #[test]
    fn moveless_bestmove_consumes_its_request() {
        let mut h = Harness::new();
        h.expect("a", RequestKind::BestMove);
        h.expect("b", RequestKind::BestMove);
        h.feed(&["bestmove (none)", "bestmove b2b3"]);
        assert_eq!(h.router.get_best_move(&key("b")).unwrap(), Some(uci("b2b3")));
        assert_eq!(h.router.get_best_move(&key("a")).unwrap(), None);
        assert_eq!(h.router.pending().count(), 0);
    }

    #[test]
    fn retract_only_forgets_the_latest_request() {
        let mut h = Harness::new();
        h.expect("a", RequestKind::BestMove);
        h.expect("b", RequestKind::Evaluation);
        h.router.retract(RequestId(1));
        assert_eq!(h.router.pending().count(), 2);
        h.router.retract(RequestId(2));
        let left: Vec<RequestId> = h.router.pending().map(|p| p.id).collect();
        assert_eq!(left, vec![RequestId(1)]);
    }

    #[test]
    fn unread_replies_can_be_discarded_by_kind() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        h.expect("p", RequestKind::Evaluation);
        h.feed(&["bestmove e2e4", "move e2e4 10", "done"]);
        h.router.discard_resolved(RequestKind::BestMove);
        assert_eq!(h.router.resolved(RequestKind::BestMove), 0);
        assert_eq!(h.router.resolved(RequestKind::Evaluation), 1);
        assert_eq!(h.router.get_evaluation_batch(&key("p")).unwrap(), Some(vec![(uci("e2e4"), 10)]));
    }

    #[test]
    fn connection_check_sees_closed_stream_without_pending_requests() {
        let mut h = Harness::new();
        assert!(h.router.check_connection().is_ok());
        let Harness { lines, mut router, shutdown: _keep, .. } = h;
        drop(lines);
        assert!(matches!(router.check_connection(), Err(EngineError::Disconnected)));
    }

    #[tokio::test]
    async fn wait_suspends_until_reply_arrives() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        let lines = h.lines.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            lines.send("bestmove b1c3".to_string()).await.unwrap();
        });
        assert_eq!(h.router.wait_best_move(&key("p")).await.unwrap(), uci("b1c3"));
    }

    #[tokio::test]
    async fn wait_without_request_fails_fast() {
        let mut h = Harness::new();
        assert!(matches!(h.router.wait_evaluation(&key("p")).await, Err(EngineError::NothingPending(_))));
    }

    #[tokio::test]
    async fn wait_is_interrupted_by_shutdown() {
        let mut h = Harness::new();
        h.expect("p", RequestKind::BestMove);
        let shutdown = h.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            shutdown.send_replace(true);
        });
        assert!(matches!(h.router.wait_best_move(&key("p")).await, Err(EngineError::Shutdown)));
    }
}
