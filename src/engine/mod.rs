pub mod history;
pub mod job;
pub mod process;
pub mod protocol;
pub mod scripted;
pub mod worker;

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::engine::history::AnalysisHistory;
use crate::engine::job::{AnalysisJob, AnalysisRequest};
use crate::engine::process::{EngineFactory, Launcher};
use crate::engine::worker::{EngineWorker, WorkerPhase, WorkerStatus};
use crate::game::board::VirtualBoard;
use crate::models::{EngineConfig, GameSettings};

/// Wait before relaunching a failed engine; doubles per consecutive failure
const RESTART_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(16);

fn restart_backoff(restarts: u32) -> Duration {
    RESTART_BACKOFF
        .saturating_mul(1 << restarts.min(4))
        .min(MAX_RESTART_BACKOFF)
}

/// What an engine is used for; each role owns its own worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineRole {
    Game,
    Hint,
    Analysis,
}

impl EngineRole {
    pub fn name(self) -> &'static str {
        match self {
            EngineRole::Game => "game",
            EngineRole::Hint => "hint",
            EngineRole::Analysis => "analysis",
        }
    }

    /// Plies kept in the history window
    pub fn history_limit(self) -> usize {
        match self {
            EngineRole::Game => 1,
            EngineRole::Hint | EngineRole::Analysis => 9,
        }
    }

    pub fn multipv(self) -> usize {
        match self {
            EngineRole::Hint => 3,
            EngineRole::Game | EngineRole::Analysis => 1,
        }
    }

    pub fn config(self, settings: &GameSettings) -> &EngineConfig {
        match self {
            EngineRole::Game => &settings.game_engine,
            EngineRole::Hint | EngineRole::Analysis => &settings.analysis_engine,
        }
    }
}

/// Result of a non-blocking look at an engine
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPoll {
    pub ply: usize,
    pub complete: bool,
    pub interrupted: bool,
    pub bestmove: Option<String>,
    /// Centipawns from white's point of view
    pub score: i32,
    pub pv: Vec<String>,
    /// Set when the line belongs to a superseded request
    pub stale: bool,
}

impl AnalysisPoll {
    fn of(job: &AnalysisJob, stale: bool) -> Self {
        let result = job.snapshot();
        AnalysisPoll {
            ply: job.request.ply,
            complete: result.complete,
            interrupted: result.interrupted,
            bestmove: result.bestmove().map(str::to_string),
            score: result.score(0),
            pv: result
                .variations
                .first()
                .map(|v| v.pv.clone())
                .unwrap_or_default(),
            stale,
        }
    }
}

/// State of the game engine's latest request, as the state machine sees it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineReport {
    pub bestmove: Option<String>,
    pub complete: bool,
    pub interrupted: bool,
    pub failure: Option<String>,
    /// Position the request was made for
    pub fen: Option<String>,
}

/// One engine role: a worker plus the history of what it was asked.
pub struct Engine {
    role: EngineRole,
    worker: EngineWorker,
    history: AnalysisHistory,
    session_id: Uuid,
    current: Option<Arc<AnalysisJob>>,
    previous: Option<Arc<AnalysisJob>>,
    last_fen: Option<String>,
    extended_complete: bool,
    depth: u8,
    started_at: Instant,
    /// Consecutive relaunches after failures
    restarts: u32,
}

impl Engine {
    pub fn start(role: EngineRole, config: &EngineConfig, launcher: Launcher, session_id: Uuid) -> Self {
        info!("Starting {} engine {} at depth {}", role.name(), config.engine, config.depth);
        Engine {
            role,
            worker: EngineWorker::spawn(&config.engine, config, launcher),
            history: AnalysisHistory::new(role.history_limit()),
            session_id,
            current: None,
            previous: None,
            last_fen: None,
            extended_complete: false,
            depth: config.depth,
            started_at: Instant::now(),
            restarts: 0,
        }
    }

    pub fn role(&self) -> EngineRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn status(&self) -> WorkerStatus {
        self.worker.status()
    }

    pub fn history(&self) -> &AnalysisHistory {
        &self.history
    }

    pub fn extended_complete(&self) -> bool {
        self.extended_complete
    }

    /// Live request for the board's current position, superseding the one in flight
    pub fn request(&mut self, board: &VirtualBoard, root_moves: Option<Vec<String>>) -> Arc<AnalysisJob> {
        let job = AnalysisJob::new(AnalysisRequest::from_board(
            board,
            self.role.multipv(),
            root_moves,
            self.session_id,
        ));
        if let Some(current) = self.current.take() {
            // The worker confirms this once it has stopped; readers see it at once
            current.mark_interrupted();
            self.previous = Some(current);
        }
        for evicted in self.history.insert_latest(Arc::clone(&job)) {
            evicted.mark_interrupted();
        }
        self.worker.request(Arc::clone(&job));
        self.last_fen = Some(job.request.fen.clone());
        self.current = Some(Arc::clone(&job));
        self.extended_complete = false;
        job
    }

    /// Latest line; while the newest request runs, the superseded one is shown
    pub fn poll(&self) -> Option<AnalysisPoll> {
        let current = self.current.as_ref()?;
        if !current.is_complete() {
            if let Some(previous) = &self.previous {
                if previous.bestmove().is_some() {
                    return Some(AnalysisPoll::of(previous, true));
                }
            }
        }
        Some(AnalysisPoll::of(current, false))
    }

    /// Requests a move unless the same position is already being searched
    pub fn go(&mut self, board: &VirtualBoard, reissue: bool) -> bool {
        let fen = board.fen();
        if !reissue && self.last_fen.as_deref() == Some(fen.as_str()) {
            return false;
        }
        self.request(board, None);
        true
    }

    pub fn report(&self) -> EngineReport {
        let status = self.worker.status();
        let failure = match status.phase {
            WorkerPhase::Failed => status.failure,
            _ => None,
        };
        match &self.current {
            Some(job) => {
                let result = job.snapshot();
                EngineReport {
                    bestmove: result.bestmove().map(str::to_string),
                    complete: result.complete,
                    interrupted: result.interrupted,
                    failure,
                    fen: Some(job.request.fen.clone()),
                }
            }
            None => EngineReport {
                failure,
                ..EngineReport::default()
            },
        }
    }

    /// Cuts the running search short if it already has a move to play
    pub fn interrupt_bestmove(&self) -> bool {
        let Some(job) = &self.current else {
            return false;
        };
        if job.is_complete() || job.bestmove().is_none() {
            return false;
        }
        debug!("Forcing {} engine to move", self.role.name());
        self.worker.interrupt();
        true
    }

    pub fn interrupt(&self) {
        self.worker.interrupt();
    }

    /// Forgets analysis of plies that were taken back
    pub fn prune_after(&mut self, ply: usize) {
        for job in self.history.prune_after(ply) {
            job.mark_interrupted();
        }
        let gone = |job: &Option<Arc<AnalysisJob>>| job.as_ref().is_some_and(|j| j.request.ply > ply);
        if gone(&self.current) {
            self.current = None;
            self.last_fen = None;
        }
        if gone(&self.previous) {
            self.previous = None;
        }
    }

    /// Keeps the window behind the current ply analysed, one request at a time.
    ///
    /// The live position comes first. Once it is complete the window is
    /// scanned backwards: a missing ply is launched, an interrupted one is
    /// resumed, and a ply still running ends the scan.
    pub fn update_extended(&mut self, board: &VirtualBoard, root_moves: Option<Vec<String>>) {
        let ply = board.ply();
        self.prune_after(ply);

        let fen = board.fen();
        let live = match &self.current {
            Some(job) if job.request.fen == fen => Arc::clone(job),
            _ => {
                self.request(board, root_moves);
                return;
            }
        };
        if !live.is_complete() {
            return;
        }

        let oldest = (ply + 1).saturating_sub(self.history.limit());
        for p in (oldest..ply).rev() {
            let position = board.at_ply(p);
            match self.history.get(p).cloned() {
                Some(job) if job.request.fen == position.fen() => {
                    if job.is_complete() {
                        continue;
                    }
                    if job.is_interrupted() {
                        debug!("Resuming {} analysis of ply {}", self.role.name(), p);
                        self.worker.request(job);
                    }
                    return;
                }
                _ => {
                    let job = AnalysisJob::new(AnalysisRequest::from_board(
                        &position,
                        self.role.multipv(),
                        None,
                        self.session_id,
                    ));
                    if self.history.insert_backfill(Arc::clone(&job)) {
                        debug!("Backfilling {} analysis of ply {}", self.role.name(), p);
                        self.worker.request(job);
                    }
                    return;
                }
            }
        }
        self.extended_complete = true;
    }

    pub fn score_text(&self) -> Option<String> {
        let poll = self.poll()?;
        if poll.bestmove.is_none() {
            return None;
        }
        Some(protocol::format_score(poll.score))
    }

    /// (ply, move that led there, formatted score) for every ply in the window
    pub fn history_rows(&self) -> Vec<(usize, Option<String>, String)> {
        self.history
            .iter()
            .map(|(ply, job)| {
                let result = job.snapshot();
                let score = if result.variations.is_empty() && !result.complete {
                    "...".to_string()
                } else {
                    protocol::format_score(result.score(0))
                };
                (*ply, job.request.last_move.clone(), score)
            })
            .collect()
    }

    pub fn shutdown(&mut self) {
        if let Some(job) = &self.current {
            job.mark_interrupted();
        }
        self.worker.shutdown();
    }
}

/// The engines of one session, started on demand.
#[derive(Default)]
pub struct EngineSet {
    game: Option<Engine>,
    hint: Option<Engine>,
    analysis: Option<Engine>,
}

impl EngineSet {
    fn slot(&mut self, role: EngineRole) -> &mut Option<Engine> {
        match role {
            EngineRole::Game => &mut self.game,
            EngineRole::Hint => &mut self.hint,
            EngineRole::Analysis => &mut self.analysis,
        }
    }

    pub fn get(&self, role: EngineRole) -> Option<&Engine> {
        match role {
            EngineRole::Game => self.game.as_ref(),
            EngineRole::Hint => self.hint.as_ref(),
            EngineRole::Analysis => self.analysis.as_ref(),
        }
    }

    /// Returns the engine for `role`, starting it first. An engine is
    /// restarted after a configuration change, and relaunched with backoff
    /// once it has failed.
    pub fn ensure(
        &mut self,
        role: EngineRole,
        settings: &GameSettings,
        factory: &dyn EngineFactory,
        session_id: Uuid,
    ) -> &mut Engine {
        let config = role.config(settings);
        let slot = self.slot(role);
        let outdated = slot
            .as_ref()
            .is_some_and(|e| e.name() != config.engine || e.depth() != config.depth);
        let relaunch = if outdated {
            None
        } else {
            slot.as_ref().and_then(|e| {
                let failed = e.status().phase == WorkerPhase::Failed;
                (failed && e.started_at.elapsed() >= restart_backoff(e.restarts))
                    .then_some(e.restarts + 1)
            })
        };
        if let Some(engine) = slot.as_mut() {
            if matches!(engine.status().phase, WorkerPhase::Idle | WorkerPhase::Searching) {
                engine.restarts = 0;
            }
        }
        if outdated || relaunch.is_some() {
            if let Some(mut engine) = slot.take() {
                if relaunch.is_some() {
                    warn!("Relaunching failed {} engine {}", role.name(), engine.name());
                }
                engine.shutdown();
            }
        }
        let engine = slot
            .get_or_insert_with(|| Engine::start(role, config, factory.launcher(config), session_id));
        if let Some(restarts) = relaunch {
            engine.restarts = restarts;
        }
        engine
    }

    pub fn prune_after(&mut self, ply: usize) {
        for engine in [&mut self.game, &mut self.hint, &mut self.analysis]
            .into_iter()
            .flatten()
        {
            engine.prune_after(ply);
        }
    }

    pub fn stop_all(&mut self) {
        for role in [EngineRole::Game, EngineRole::Hint, EngineRole::Analysis] {
            if let Some(mut engine) = self.slot(role).take() {
                info!("Stopping {} engine {}", role.name(), engine.name());
                engine.shutdown();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.game.is_none() && self.hint.is_none() && self.analysis.is_none()
    }
}
