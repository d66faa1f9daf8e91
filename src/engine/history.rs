use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::job::AnalysisJob;

/// Analysis jobs indexed by ply, bounded to a window behind the latest live request.
#[derive(Debug)]
pub struct AnalysisHistory {
    limit: usize,
    entries: BTreeMap<usize, Arc<AnalysisJob>>,
    latest: Option<usize>,
}

impl AnalysisHistory {
    pub fn new(limit: usize) -> Self {
        AnalysisHistory {
            limit: limit.max(1),
            entries: BTreeMap::new(),
            latest: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, ply: usize) -> Option<&Arc<AnalysisJob>> {
        self.entries.get(&ply)
    }

    pub fn latest_ply(&self) -> Option<usize> {
        self.latest
    }

    pub fn latest(&self) -> Option<&Arc<AnalysisJob>> {
        self.latest.and_then(|ply| self.entries.get(&ply))
    }

    pub fn plies(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &Arc<AnalysisJob>)> {
        self.entries.iter()
    }

    /// Whether `ply` lies inside the window ending at the latest live request
    pub fn in_window(&self, ply: usize) -> bool {
        self.latest
            .is_some_and(|latest| ply <= latest && latest - ply < self.limit)
    }

    /// Registers a live request. The previous ply's score becomes the new
    /// job's fallback, then everything outside the new window is evicted and
    /// returned.
    pub fn insert_latest(&mut self, job: Arc<AnalysisJob>) -> Vec<Arc<AnalysisJob>> {
        let ply = job.request.ply;
        if let Some(previous) = ply.checked_sub(1).and_then(|p| self.entries.get(&p)) {
            job.set_default_score(previous.score(0));
        }
        self.entries.insert(ply, job);
        self.latest = Some(ply);
        let limit = self.limit;
        let (keep, evicted): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|(k, _)| *k <= ply && ply - *k < limit);
        self.entries = keep;
        evicted.into_values().collect()
    }

    /// Registers a backfill request; refused outside the window
    pub fn insert_backfill(&mut self, job: Arc<AnalysisJob>) -> bool {
        let ply = job.request.ply;
        if !self.in_window(ply) {
            return false;
        }
        if let Some(previous) = ply.checked_sub(1).and_then(|p| self.entries.get(&p)) {
            job.set_default_score(previous.score(0));
        }
        self.entries.insert(ply, job);
        true
    }

    /// Drops entries for plies that no longer exist after a take-back
    pub fn prune_after(&mut self, ply: usize) -> Vec<Arc<AnalysisJob>> {
        let pruned = self.entries.split_off(&(ply + 1));
        if self.latest.is_some_and(|latest| latest > ply) {
            self.latest = Some(ply);
        }
        pruned.into_values().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::AnalysisRequest;
    use crate::game::board::VirtualBoard;
    use uuid::Uuid;

    const MOVES: [&str; 12] = [
        "e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6", "b5a4", "g8f6", "e1g1", "f8e7", "f1e1",
        "b7b5",
    ];

    fn job_at(ply: usize) -> Arc<AnalysisJob> {
        let mut board = VirtualBoard::new();
        for mv in &MOVES[..ply] {
            board.push_uci(mv).unwrap();
        }
        AnalysisJob::new(AnalysisRequest::from_board(&board, 1, None, Uuid::nil()))
    }

    fn assert_window(history: &AnalysisHistory, current: usize) {
        assert!(history.len() <= history.limit());
        assert!(history.plies().iter().all(|&p| p <= current));
    }

    #[test]
    fn test_live_requests_slide_the_window() {
        let mut history = AnalysisHistory::new(3);
        for ply in 0..8 {
            history.insert_latest(job_at(ply));
            assert_window(&history, ply);
        }
        assert_eq!(history.plies(), vec![5, 6, 7]);
        assert_eq!(history.latest_ply(), Some(7));
    }

    #[test]
    fn test_default_score_comes_from_previous_ply() {
        let mut history = AnalysisHistory::new(1);
        let first = job_at(0);
        first.update(|r| {
            r.variations.push(crate::engine::job::Variation {
                score: Some(33),
                pv: vec!["e2e4".to_string()],
            })
        });
        history.insert_latest(first);
        let second = job_at(1);
        let evicted = history.insert_latest(Arc::clone(&second));
        assert_eq!(evicted.len(), 1);
        assert_eq!(second.score(0), 33);
    }

    #[test]
    fn test_backfill_respects_window() {
        let mut history = AnalysisHistory::new(3);
        history.insert_latest(job_at(6));
        assert!(history.insert_backfill(job_at(5)));
        assert!(history.insert_backfill(job_at(4)));
        assert!(!history.insert_backfill(job_at(3)));
        assert!(!history.insert_backfill(job_at(7)));
        assert_window(&history, 6);
    }

    #[test]
    fn test_window_invariant_under_take_backs() {
        let mut history = AnalysisHistory::new(4);
        let mut current = 0usize;
        // Deterministic mix of moves, backfills and take-backs
        for step in 0..60usize {
            match step % 7 {
                0 | 1 | 3 if current < MOVES.len() => {
                    current += 1;
                    history.insert_latest(job_at(current));
                }
                2 | 5 => {
                    let back = current.saturating_sub(step % 3);
                    history.insert_backfill(job_at(back));
                }
                _ => {
                    current = current.saturating_sub(1 + step % 2);
                    history.prune_after(current);
                    history.insert_latest(job_at(current));
                }
            }
            assert_window(&history, current);
        }
    }
}
