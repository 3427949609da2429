use crate::config::TimeControl;
use shakmaty::Color;
use tokio::time::{Duration, Instant};

/// Two countdown clocks with increment; only one runs at a time.
#[derive(Clone, Debug)]
pub struct GameClock {
    white: Duration,
    black: Duration,
    increment: Duration,
    running: Option<(Color, Instant)>,
}

impl GameClock {
    pub fn new(tc: TimeControl) -> Self {
        let base = Duration::from_millis(tc.base_ms);
        Self { white: base, black: base, increment: Duration::from_millis(tc.inc_ms), running: None }
    }

    pub fn start(&mut self, side: Color, now: Instant) { self.running = Some((side, now)); }

    pub fn stop(&mut self, now: Instant) {
        if let Some((side, _)) = self.running {
            let left = self.remaining(side, now);
            *self.slot(side) = left;
            self.running = None;
        }
    }

    pub fn remaining(&self, side: Color, now: Instant) -> Duration {
        let stored = match side { Color::White => self.white, Color::Black => self.black };
        match self.running {
            Some((running, since)) if running == side => stored.saturating_sub(now.saturating_duration_since(since)),
            _ => stored,
        }
    }

    pub fn flagged(&self, now: Instant) -> Option<Color> {
        let (side, _) = self.running?;
        self.remaining(side, now).is_zero().then_some(side)
    }

    /// Ends the running side's turn. Returns the side that ran out of time,
    /// in which case the clock stops instead of switching.
    pub fn press(&mut self, now: Instant) -> Option<Color> {
        let (side, _) = self.running?;
        if let Some(flagged) = self.flagged(now) {
            self.stop(now);
            return Some(flagged);
        }
        self.stop(now);
        let inc = self.increment;
        *self.slot(side) += inc;
        self.start(!side, now);
        None
    }

    pub fn millis(&self, now: Instant) -> (u64, u64) {
        (self.remaining(Color::White, now).as_millis() as u64, self.remaining(Color::Black, now).as_millis() as u64)
    }

    fn slot(&mut self, side: Color) -> &mut Duration {
        match side { Color::White => &mut self.white, Color::Black => &mut self.black }
    }
}
