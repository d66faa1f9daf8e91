use chess::Color;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::engine::protocol::InfoLine;
use crate::game::board::VirtualBoard;
use crate::models::lock_or_recover;

/// Immutable description of one position to analyse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub ply: usize,
    /// Move that produced the position, used to tell positions apart after a take-back
    pub last_move: Option<String>,
    /// Side to move in the analysed position
    pub turn: Color,
    pub multipv: usize,
    pub root_moves: Option<Vec<String>>,
    pub session_id: Uuid,
    pub start_fen: String,
    pub moves: Vec<String>,
    pub fen: String,
}

impl AnalysisRequest {
    pub fn from_board(
        board: &VirtualBoard,
        multipv: usize,
        root_moves: Option<Vec<String>>,
        session_id: Uuid,
    ) -> Self {
        AnalysisRequest {
            ply: board.ply(),
            last_move: board.last_move().map(|m| m.to_string()),
            turn: board.side_to_move(),
            multipv: multipv.max(1),
            root_moves,
            session_id,
            start_fen: board.start_fen().to_string(),
            moves: board.uci_moves(),
            fen: board.fen(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variation {
    /// Centipawns from white's point of view
    pub score: Option<i32>,
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisResult {
    pub variations: Vec<Variation>,
    pub depth: Option<u32>,
    pub complete: bool,
    pub interrupted: bool,
    /// Shown while no score is known yet, carried over from the previous ply
    pub default_score: i32,
}

impl AnalysisResult {
    pub fn score(&self, idx: usize) -> i32 {
        self.variations
            .get(idx)
            .and_then(|v| v.score)
            .unwrap_or(self.default_score)
    }

    pub fn bestmove(&self) -> Option<&str> {
        self.variations
            .first()
            .and_then(|v| v.pv.first())
            .map(String::as_str)
    }

    /// Folds an info line into the matching variation
    pub fn apply_info(&mut self, info: &InfoLine, turn: Color) {
        if info.score.is_none() && info.pv.is_empty() {
            return;
        }
        let idx = info.multipv.max(1) - 1;
        if self.variations.len() <= idx {
            self.variations.resize(idx + 1, Variation::default());
        }
        let variation = &mut self.variations[idx];
        if let Some(score) = info.score {
            let white = if turn == Color::Black { score.negate() } else { score };
            variation.score = Some(white.to_cp());
        }
        if !info.pv.is_empty() {
            variation.pv = info.pv.clone();
        }
        if info.depth.is_some() {
            self.depth = info.depth;
        }
    }

    /// Makes sure the reported best move leads the first variation
    pub fn apply_bestmove(&mut self, bestmove: Option<&str>) {
        let Some(mv) = bestmove else { return };
        if self.variations.is_empty() {
            self.variations.push(Variation::default());
        }
        let first = &mut self.variations[0];
        if first.pv.first().map(String::as_str) != Some(mv) {
            first.pv = vec![mv.to_string()];
        }
    }
}

/// A request paired with its result; written by one worker, read by anyone.
#[derive(Debug)]
pub struct AnalysisJob {
    pub request: AnalysisRequest,
    result: Mutex<AnalysisResult>,
}

impl AnalysisJob {
    pub fn new(request: AnalysisRequest) -> Arc<Self> {
        Arc::new(AnalysisJob {
            request,
            result: Mutex::new(AnalysisResult::default()),
        })
    }

    pub fn snapshot(&self) -> AnalysisResult {
        lock_or_recover(&self.result).clone()
    }

    pub fn update<F: FnOnce(&mut AnalysisResult)>(&self, f: F) {
        f(&mut lock_or_recover(&self.result));
    }

    pub fn is_complete(&self) -> bool {
        lock_or_recover(&self.result).complete
    }

    pub fn is_interrupted(&self) -> bool {
        lock_or_recover(&self.result).interrupted
    }

    pub fn score(&self, idx: usize) -> i32 {
        lock_or_recover(&self.result).score(idx)
    }

    pub fn bestmove(&self) -> Option<String> {
        lock_or_recover(&self.result).bestmove().map(str::to_string)
    }

    pub fn set_default_score(&self, score: i32) {
        self.update(|r| r.default_score = score);
    }

    /// Marks a superseded search; complete results are left alone
    pub fn mark_interrupted(&self) {
        self.update(|r| {
            if !r.complete {
                r.interrupted = true;
            }
        });
    }
}
