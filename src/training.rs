use crate::router::EvaluationBatch;
use crate::types::{PositionKey, Tier};
use shakmaty::uci::Uci;
use std::collections::HashMap;

const GOOD_MARGIN: i32 = 100;
const OK_MARGIN: i32 = 300;

/// Engine scores for one position, used to grade the move played there.
#[derive(Clone, Debug)]
pub struct TrainingRecord {
    pub position: PositionKey,
    pub scores: HashMap<Uci, i32>,
    pub best_move: Uci,
    pub best_score: i32,
    pub last_tier: Option<Tier>,
}

#[derive(Debug, Default)]
pub struct TrainingEvaluator {
    record: Option<TrainingRecord>,
}

impl TrainingEvaluator {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self) -> Option<&TrainingRecord> { self.record.as_ref() }

    pub fn is_for(&self, position: &PositionKey) -> bool {
        self.record.as_ref().is_some_and(|r| r.position == *position)
    }

    /// Replaces the record with a fresh evaluation of `position`. Ties for the
    /// best score go to the move the engine reported first. An empty batch
    /// clears the record.
    pub fn update(&mut self, position: PositionKey, batch: &EvaluationBatch) {
        let mut best: Option<(&Uci, i32)> = None;
        for (m, score) in batch {
            if best.map_or(true, |(_, s)| *score > s) { best = Some((m, *score)); }
        }
        self.record = best.map(|(m, score)| TrainingRecord {
            position,
            scores: batch.iter().cloned().collect(),
            best_move: m.clone(),
            best_score: score,
            last_tier: None,
        });
    }

    /// Grades `played` against the record. Returns `None` when the record was
    /// built for another position or the engine did not score the move.
    pub fn classify(&mut self, position: &PositionKey, played: &Uci) -> Option<Tier> {
        let record = self.record.as_mut().filter(|r| r.position == *position)?;
        let tier = if *played == record.best_move {
            Tier::Perfect
        } else {
            let diff = record.best_score - *record.scores.get(played)?;
            if diff < GOOD_MARGIN {
                Tier::Good
            } else if diff < OK_MARGIN {
                Tier::Ok
            } else {
                Tier::Bad
            }
        };
        record.last_tier = Some(tier);
        Some(tier)
    }

    pub fn reset(&mut self) { self.record = None; }
}
