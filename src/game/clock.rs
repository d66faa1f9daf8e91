use chess::Color;
use std::time::{Duration, Instant};

use crate::game::board::VirtualBoard;

const TIME_WARNING_MS: u64 = 30_000;
const UNLIMITED_AI_PAUSE: Duration = Duration::from_millis(1000);
const MIN_AI_PAUSE_MS: u64 = 200;
const MAX_AI_PAUSE_MS: u64 = 5_000;

/// Chess clock driven by the tick loop; time is charged to the side to move.
#[derive(Debug, Clone, Default)]
pub struct GameClock {
    timed: bool,
    white_time_ms: u64,
    black_time_ms: u64,
    increment_ms: u64,
    last_update: Option<Instant>,
    last_ply: usize,
}

impl GameClock {
    /// Restarts the clock; `preset` is (minutes, increment seconds) or `None` when untimed
    pub fn start(&mut self, preset: Option<(u32, u32)>, board: &VirtualBoard, now: Instant) {
        let (minutes, increment) = preset.unwrap_or((0, 0));
        let total = minutes as u64 * 60_000;
        *self = GameClock {
            timed: preset.is_some(),
            white_time_ms: total,
            black_time_ms: total,
            increment_ms: increment as u64 * 1000,
            last_update: Some(now),
            last_ply: board.ply(),
        };
    }

    pub fn is_timed(&self) -> bool {
        self.timed
    }

    fn time_mut(&mut self, color: Color) -> &mut u64 {
        match color {
            Color::White => &mut self.white_time_ms,
            Color::Black => &mut self.black_time_ms,
        }
    }

    pub fn remaining_ms(&self, color: Color) -> Option<u64> {
        if !self.timed {
            return None;
        }
        Some(match color {
            Color::White => self.white_time_ms,
            Color::Black => self.black_time_ms,
        })
    }

    /// Charges the time since the last update to the side to move and
    /// credits the increment when a move was played in between.
    pub fn update(&mut self, board: &VirtualBoard, now: Instant) {
        if !self.timed {
            return;
        }
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            self.last_ply = board.ply();
            return;
        };
        let elapsed = now.saturating_duration_since(last).as_millis() as u64;
        let ply = board.ply();
        if ply > self.last_ply {
            // The elapsed time belongs to the side that just moved
            let mover = !board.side_to_move();
            let increment = self.increment_ms;
            let time = self.time_mut(mover);
            *time = time.saturating_sub(elapsed) + increment;
        } else if ply == self.last_ply {
            let time = self.time_mut(board.side_to_move());
            *time = time.saturating_sub(elapsed);
        }
        self.last_ply = ply;
        self.last_update = Some(now);
    }

    /// Restarts timing from `now` without charging anyone
    pub fn hold(&mut self, board: &VirtualBoard, now: Instant) {
        if self.timed {
            self.last_update = Some(now);
            self.last_ply = board.ply();
        }
    }

    /// Side whose flag fell, if any
    pub fn flagged(&self) -> Option<Color> {
        if !self.timed {
            return None;
        }
        if self.white_time_ms == 0 {
            Some(Color::White)
        } else if self.black_time_ms == 0 {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// The side to move is below the warning threshold
    pub fn time_warning(&self, board: &VirtualBoard) -> bool {
        self.remaining_ms(board.side_to_move())
            .is_some_and(|ms| ms < TIME_WARNING_MS)
    }

    /// Minimum pause before an engine move is shown, a share of its remaining time
    pub fn ai_pause(&self, ai: Color) -> Duration {
        match self.remaining_ms(ai) {
            None => UNLIMITED_AI_PAUSE,
            Some(ms) => Duration::from_millis((ms / 60).clamp(MIN_AI_PAUSE_MS, MAX_AI_PAUSE_MS)),
        }
    }
}
