//! One engine process per worker thread, fed through an explicit command channel.

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::job::AnalysisJob;
use crate::engine::process::{EngineChannel, Launcher};
use crate::engine::protocol::{self, EngineLine};
use crate::error::{EngineError, EngineResult};
use crate::models::{lock_or_recover, EngineConfig};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_JOIN_WAIT: Duration = Duration::from_secs(5);

pub enum WorkerCommand {
    /// Search a position, superseding whatever runs now
    Analyze(Arc<AnalysisJob>),
    /// Stop the current search but keep the engine
    Interrupt,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Idle,
    Searching,
    Stopped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub phase: WorkerPhase,
    pub failure: Option<String>,
}

type SharedStatus = Arc<Mutex<WorkerStatus>>;

fn set_phase(status: &SharedStatus, phase: WorkerPhase) {
    lock_or_recover(status).phase = phase;
}

fn set_failure(status: &SharedStatus, name: &str, err: &EngineError) {
    error!("Engine {} failed: {}", name, err);
    let mut status = lock_or_recover(status);
    status.phase = WorkerPhase::Failed;
    status.failure = Some(err.to_string());
}

/// Handle to a worker thread owning one engine.
pub struct EngineWorker {
    name: String,
    commands: Sender<WorkerCommand>,
    status: SharedStatus,
    thread: Option<JoinHandle<()>>,
}

impl EngineWorker {
    /// Starts the worker; the engine itself is launched on the worker thread
    pub fn spawn(name: &str, config: &EngineConfig, launcher: Launcher) -> Self {
        let (tx, rx) = unbounded();
        let status = Arc::new(Mutex::new(WorkerStatus {
            phase: WorkerPhase::Starting,
            failure: None,
        }));
        let thread_status = Arc::clone(&status);
        let thread_name = name.to_string();
        let config = config.clone();
        let thread = thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || run(thread_name, config, launcher, rx, thread_status));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                set_failure(&status, name, &EngineError::Io(e));
                None
            }
        };
        EngineWorker {
            name: name.to_string(),
            commands: tx,
            status,
            thread,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> WorkerStatus {
        lock_or_recover(&self.status).clone()
    }

    pub fn request(&self, job: Arc<AnalysisJob>) {
        if self.commands.send(WorkerCommand::Analyze(job)).is_err() {
            warn!("Engine {} is gone, request dropped", self.name);
        }
    }

    pub fn interrupt(&self) {
        let _ = self.commands.send(WorkerCommand::Interrupt);
    }

    /// Stops the engine and joins the thread; safe to call repeatedly
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let (done_tx, done_rx) = bounded(1);
        let joiner = thread::spawn(move || {
            let _ = handle.join();
            let _ = done_tx.send(());
        });
        match done_rx.recv_timeout(MAX_JOIN_WAIT) {
            Ok(()) => {
                let _ = joiner.join();
                debug!("Engine {} worker joined", self.name);
            }
            Err(_) => warn!("Engine {} worker did not stop in time", self.name),
        }
        set_phase(&self.status, WorkerPhase::Stopped);
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps the command channel serviced after the engine died so shutdown still works
fn idle_until_shutdown(commands: &Receiver<WorkerCommand>) {
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Shutdown => return,
            WorkerCommand::Analyze(job) => {
                debug!("Ignoring request {} on a failed engine", job.request.ply);
            }
            WorkerCommand::Interrupt => {}
        }
    }
}

fn run(
    name: String,
    config: EngineConfig,
    launcher: Launcher,
    commands: Receiver<WorkerCommand>,
    status: SharedStatus,
) {
    let channel = match launcher() {
        Ok(channel) => channel,
        Err(e) => {
            set_failure(&status, &name, &e);
            idle_until_shutdown(&commands);
            return;
        }
    };
    let mut search = SearchLoop::new(name.clone(), channel, config.depth, Arc::clone(&status));
    if let Err(e) = search.handshake(&config) {
        set_failure(&status, &name, &e);
        search.channel.close();
        idle_until_shutdown(&commands);
        return;
    }
    info!("Engine {} ready", name);
    set_phase(&status, WorkerPhase::Idle);

    let lines = search.channel.lines().clone();
    loop {
        // Block only if there is no search running
        let event = if search.active.is_none() {
            match commands.recv() {
                Ok(command) => Event::Command(command),
                Err(_) => Event::Command(WorkerCommand::Shutdown),
            }
        } else {
            select! {
                recv(commands) -> command => {
                    Event::Command(command.unwrap_or(WorkerCommand::Shutdown))
                }
                recv(lines) -> line => match line {
                    Ok(line) => Event::Line(line),
                    Err(_) => Event::EngineGone,
                },
            }
        };

        let outcome = match event {
            Event::Command(WorkerCommand::Analyze(job)) => {
                search.preempt().and_then(|_| search.start(job))
            }
            Event::Command(WorkerCommand::Interrupt) => search.preempt(),
            Event::Command(WorkerCommand::Shutdown) => {
                let _ = search.preempt();
                search.channel.close();
                set_phase(&status, WorkerPhase::Stopped);
                debug!("Engine {} worker quitting", name);
                return;
            }
            Event::Line(line) => {
                search.handle_line(&line);
                Ok(())
            }
            Event::EngineGone => Err(EngineError::Disconnected),
        };

        if let Err(e) = outcome {
            set_failure(&status, &name, &e);
            search.channel.close();
            idle_until_shutdown(&commands);
            return;
        }
    }
}

enum Event {
    Command(WorkerCommand),
    Line(String),
    EngineGone,
}

struct SearchLoop {
    name: String,
    channel: Box<dyn EngineChannel>,
    depth: u8,
    supported: HashSet<String>,
    multipv: usize,
    active: Option<Arc<AnalysisJob>>,
    status: SharedStatus,
}

impl SearchLoop {
    fn new(name: String, channel: Box<dyn EngineChannel>, depth: u8, status: SharedStatus) -> Self {
        SearchLoop {
            name,
            channel,
            depth,
            supported: HashSet::new(),
            multipv: 1,
            active: None,
            status,
        }
    }

    /// Reads lines until `done` accepts one
    fn wait_for<F: FnMut(EngineLine) -> bool>(
        &mut self,
        expected: &str,
        timeout: Duration,
        mut done: F,
    ) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.channel.lines().recv_timeout(left) {
                Ok(line) => {
                    if done(protocol::parse_line(&line)) {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Handshake {
                        expected: expected.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Disconnected),
            }
        }
    }

    fn handshake(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.channel.send("uci")?;
        let mut supported = HashSet::new();
        self.wait_for("uciok", HANDSHAKE_TIMEOUT, |line| match line {
            EngineLine::Option(name) => {
                supported.insert(name);
                false
            }
            EngineLine::UciOk => true,
            _ => false,
        })?;
        self.supported = supported;

        for (option, value) in config.option_values() {
            if self.supported.contains(&option) {
                debug!("{}: setting engine option {}:{}", self.name, option, value);
                self.channel.send(&protocol::setoption_command(&option, &value))?;
            } else {
                debug!("{}: ignoring engine option {}:{}", self.name, option, value);
            }
        }

        self.channel.send("isready")?;
        self.wait_for("readyok", HANDSHAKE_TIMEOUT, |line| line == EngineLine::ReadyOk)
    }

    fn start(&mut self, job: Arc<AnalysisJob>) -> EngineResult<()> {
        // Lines left over from an earlier search must not leak into this one
        while self.channel.lines().try_recv().is_ok() {}

        let request = &job.request;
        if request.multipv != self.multipv && self.supported.contains("MultiPV") {
            self.channel.send(&protocol::setoption_command(
                "MultiPV",
                &request.multipv.to_string(),
            ))?;
            self.multipv = request.multipv;
        }
        job.update(|r| {
            r.complete = false;
            r.interrupted = false;
        });
        debug!("{}: got new request number {}", self.name, request.ply);
        self.channel
            .send(&protocol::position_command(&request.start_fen, &request.moves))?;
        self.channel
            .send(&protocol::go_command(self.depth, request.root_moves.as_deref()))?;
        self.active = Some(job);
        set_phase(&self.status, WorkerPhase::Searching);
        Ok(())
    }

    fn handle_line(&mut self, line: &str) {
        let Some(job) = self.active.clone() else {
            return;
        };
        match protocol::parse_line(line) {
            EngineLine::Info(info) => {
                let turn = job.request.turn;
                job.update(|r| r.apply_info(&info, turn));
            }
            EngineLine::BestMove(mv) => {
                job.update(|r| {
                    r.apply_bestmove(mv.as_deref());
                    r.complete = true;
                });
                debug!("{}: request {} complete", self.name, job.request.ply);
                self.active = None;
                set_phase(&self.status, WorkerPhase::Idle);
            }
            _ => {}
        }
    }

    /// Stops the running search, keeping what it found so far
    fn preempt(&mut self) -> EngineResult<()> {
        let Some(job) = self.active.take() else {
            return Ok(());
        };
        self.channel.send("stop")?;
        let turn = job.request.turn;
        let drained = self.wait_for("bestmove", STOP_TIMEOUT, |line| match line {
            EngineLine::Info(info) => {
                job.update(|r| r.apply_info(&info, turn));
                false
            }
            EngineLine::BestMove(mv) => {
                job.update(|r| r.apply_bestmove(mv.as_deref()));
                true
            }
            _ => false,
        });
        job.update(|r| r.interrupted = true);
        debug!("{}: stopped previous request number {}", self.name, job.request.ply);
        set_phase(&self.status, WorkerPhase::Idle);
        match drained {
            Err(EngineError::Handshake { .. }) => {
                warn!("{}: no bestmove after stop", self.name);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::AnalysisRequest;
    use crate::engine::scripted::{handshake_only, playing, scripted_engine};
    use crate::game::board::VirtualBoard;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(2);

    fn wait_until<F: Fn() -> bool>(f: F) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn job(board: &VirtualBoard) -> Arc<AnalysisJob> {
        AnalysisJob::new(AnalysisRequest::from_board(board, 1, None, Uuid::nil()))
    }

    #[test]
    fn test_search_completes() {
        let (engine, script) = scripted_engine(playing());
        let mut worker = EngineWorker::spawn(
            "test",
            &EngineConfig::default_game(),
            Box::new(move || Ok(Box::new(engine) as Box<dyn EngineChannel>)),
        );
        let job = job(&VirtualBoard::new());
        worker.request(Arc::clone(&job));
        assert!(wait_until(|| job.is_complete()));
        assert_eq!(job.bestmove(), Some("a2a3".to_string()));
        assert!(script.expect("setoption name Threads", WAIT).is_some());
        worker.shutdown();
        worker.shutdown();
        assert_eq!(worker.status().phase, WorkerPhase::Stopped);
    }

    #[test]
    fn test_unsupported_options_are_skipped() {
        let (engine, script) = scripted_engine(handshake_only());
        let mut worker = EngineWorker::spawn(
            "test",
            &EngineConfig::default_game(),
            Box::new(move || Ok(Box::new(engine) as Box<dyn EngineChannel>)),
        );
        assert!(wait_until(|| worker.status().phase == WorkerPhase::Idle));
        let sent: Vec<String> = script.sent.try_iter().collect();
        assert!(sent.iter().any(|l| l == "setoption name Ponder value false"));
        assert!(!sent.iter().any(|l| l.contains("Skill Level")));
        worker.shutdown();
    }

    #[test]
    fn test_new_request_interrupts_and_keeps_partial_line() {
        let (engine, script) = scripted_engine(handshake_only());
        let mut worker = EngineWorker::spawn(
            "test",
            &EngineConfig::default_analysis(),
            Box::new(move || Ok(Box::new(engine) as Box<dyn EngineChannel>)),
        );
        let mut board = VirtualBoard::new();
        let first = job(&board);
        worker.request(Arc::clone(&first));
        assert!(script.expect("go depth", WAIT).is_some());
        script.emit("info depth 8 score cp 31 pv e2e4 e7e5");
        assert!(wait_until(|| first.bestmove().is_some()));

        board.push_uci("e2e4").unwrap();
        let second = job(&board);
        worker.request(Arc::clone(&second));
        assert!(script.expect("stop", WAIT).is_some());
        script.emit("bestmove e2e4");
        assert!(script.expect("go depth", WAIT).is_some());
        assert!(wait_until(|| first.is_interrupted()));
        assert!(!first.is_complete());
        assert_eq!(first.bestmove(), Some("e2e4".to_string()));
        assert_eq!(first.score(0), 31);

        script.emit("info depth 8 score cp 20 pv e7e5");
        script.emit("bestmove e7e5");
        assert!(wait_until(|| second.is_complete()));
        assert_eq!(second.score(0), -20);
        worker.shutdown();
    }

    #[test]
    fn test_failed_launch_is_reported_and_shutdown_is_safe() {
        let mut worker = EngineWorker::spawn(
            "broken",
            &EngineConfig::default_game(),
            Box::new(|| Err(EngineError::Disconnected)),
        );
        assert!(wait_until(|| worker.status().phase == WorkerPhase::Failed));
        assert!(worker.status().failure.is_some());
        worker.request(job(&VirtualBoard::new()));
        worker.shutdown();
    }
}
