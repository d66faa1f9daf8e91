//! The tick loop: reads the board, feeds the state machine and carries out
//! the effects it asks for.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::archive::{GameArchive, SavedGame};
use crate::catalog::Catalog;
use crate::config::SettingsStore;
use crate::engine::process::EngineFactory;
use crate::engine::{Engine, EngineRole, EngineSet};
use crate::error::DriverError;
use crate::game::board::VirtualBoard;
use crate::game::book::OpeningBook;
use crate::game::machine::{transition, Event, Observation};
use crate::models::{
    CalibrationMode, Command, Effect, GameState, LedCommand, QuitReason, Session, SettingChange,
};
use crate::remote::CommandDecoder;
use crate::sensor::{BoardSensor, LedActuator};

const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(8);
const RECONNECTING: &str = "Board disconnected, reconnecting";

/// Input collected by the presentation since the previous frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub action: Option<Command>,
    pub quit: Option<QuitReason>,
}

/// Whatever shows the session to the player and collects their input
pub trait Presentation: Send {
    fn render(&mut self, state: GameState, session: &Session) -> Frame;
}

/// Everything outside the process the controller talks to
pub struct Collaborators {
    pub sensor: Box<dyn BoardSensor>,
    pub leds: Box<dyn LedActuator>,
    pub presentation: Box<dyn Presentation>,
    pub archive: Box<dyn GameArchive>,
    pub engines: Box<dyn EngineFactory>,
}

pub struct Controller {
    state: GameState,
    session: Session,
    io: Collaborators,
    engines: EngineSet,
    settings: SettingsStore,
    decoder: CommandDecoder,
    engines_dir: PathBuf,
    books_dir: PathBuf,
    last_leds: Option<LedCommand>,
    backoff: Duration,
    next_read: Option<Instant>,
    /// Board settings are written after the first good reading
    board_seen: bool,
    quit: Option<QuitReason>,
}

fn calibration_mode(state: GameState) -> Option<CalibrationMode> {
    match state {
        GameState::Calibration | GameState::CalibrationReturnHome => Some(CalibrationMode::Full),
        GameState::CalibrationPartial => Some(CalibrationMode::Partial),
        _ => None,
    }
}

/// Requests analysis of the board unless the engine already has it
fn request_position(engine: &mut Engine, board: &VirtualBoard, root_moves: Option<Vec<String>>) {
    let fen = board.fen();
    if engine.report().fen.as_deref() != Some(fen.as_str()) {
        engine.request(board, root_moves);
    }
}

impl Controller {
    pub fn new(
        session: Session,
        io: Collaborators,
        settings: SettingsStore,
        engines_dir: PathBuf,
        books_dir: PathBuf,
    ) -> Self {
        let decoder = CommandDecoder::new(session.board_settings.remote_control);
        let mut controller = Controller {
            state: GameState::Init,
            session,
            io,
            engines: EngineSet::default(),
            settings,
            decoder,
            engines_dir,
            books_dir,
            last_leds: None,
            backoff: Duration::ZERO,
            next_read: None,
            board_seen: false,
            quit: None,
        };
        controller.apply(Effect::RefreshCatalog);
        controller.apply(Effect::RefreshSavedGames);
        controller
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engines(&self) -> &EngineSet {
        &self.engines
    }

    /// Runs ticks until something asks to quit or `stop` fires
    pub fn run(&mut self, period: Duration, stop: &Receiver<()>) -> Result<QuitReason, DriverError> {
        info!("Controller running, tick every {:?}", period);
        loop {
            if let Some(reason) = self.tick(Instant::now())? {
                info!("Quitting: {:?}", reason);
                return Ok(reason);
            }
            match stop.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    self.apply(Effect::Quit(QuitReason::Interrupt));
                    return Ok(QuitReason::Interrupt);
                }
            }
        }
    }

    /// One pass of the loop; returns the quit reason once the driver should stop
    pub fn tick(&mut self, now: Instant) -> Result<Option<QuitReason>, DriverError> {
        self.read_board(now);

        // The presentation shows the state as of the previous tick
        let frame = self.io.presentation.render(self.state, &self.session);
        if let Some(reason) = frame.quit {
            self.apply(Effect::Quit(reason));
            return Ok(self.quit);
        }

        let mut command = frame.action;
        if let Some(reading) = self.session.reading.clone() {
            let decoded = self.decoder.decode(self.state, &reading, &self.session, now);
            if decoded.exit_application {
                self.apply(Effect::Quit(QuitReason::RemoteControl));
                return Ok(self.quit);
            }
            if let Some(leds) = decoded.leds {
                self.set_leds(leds);
            }
            if command.is_none() {
                command = decoded.command;
            }
        }
        if let Some(command) = command {
            debug!("Command {} in state {}", command, self.state);
            self.step(Event::Command { command, at: now })?;
        }

        let observation = self.observe(now);
        self.step(Event::Tick(observation))?;
        self.refresh_views();
        Ok(self.quit)
    }

    fn step(&mut self, event: Event) -> Result<(), DriverError> {
        let from = self.state;
        let transition = transition(self.state, &event, &mut self.session)?;
        self.state = transition.state;
        if from != self.state {
            self.decoder.on_state_change(from, self.state);
        }
        for effect in transition.effects {
            self.apply(effect);
        }
        for change in self.session.take_changes() {
            if let SettingChange::RemoteControl(on) = change {
                self.decoder.set_on(on);
            }
        }
        Ok(())
    }

    fn read_board(&mut self, now: Instant) {
        if self.next_read.is_some_and(|t| now < t) {
            return;
        }
        match self.io.sensor.read() {
            Ok(reading) => {
                if !self.backoff.is_zero() {
                    info!("Board connected");
                    if self.session.banner.as_deref() == Some(RECONNECTING) {
                        self.session.banner = None;
                    }
                }
                self.backoff = Duration::ZERO;
                self.next_read = None;
                self.session.reading = Some(reading);
                if !self.board_seen {
                    self.board_seen = true;
                    self.apply(Effect::PersistBoardSettings);
                }
            }
            Err(e) => {
                self.backoff = if self.backoff.is_zero() {
                    BACKOFF_START
                } else {
                    (self.backoff * 2).min(BACKOFF_MAX)
                };
                warn!("Reading the board failed: {}, retrying in {:?}", e, self.backoff);
                self.next_read = Some(now + self.backoff);
                self.session.reading = None;
                if self.session.banner.is_none() {
                    self.session.banner = Some(RECONNECTING.to_string());
                }
            }
        }
    }

    fn observe(&mut self, now: Instant) -> Observation {
        let mut observation = Observation::at(now);
        observation.physical = self
            .session
            .reading
            .as_ref()
            .map(|r| r.oriented(self.session.rotate180));
        observation.exit_pending = self.decoder.exit_pending();

        if let Some(mode) = calibration_mode(self.state) {
            observation.calibration_done = match self.io.sensor.calibrate(mode, false) {
                Ok(done) => done,
                Err(e) => {
                    warn!("Calibration failed: {}", e);
                    false
                }
            };
        }

        observation.engine = self.engines.get(EngineRole::Game).map(|e| e.report());
        let ply = self.session.board.ply();
        observation.hint_bestmove = self
            .engines
            .get(EngineRole::Hint)
            .and_then(|e| e.poll())
            .filter(|p| p.complete && !p.stale && p.ply == ply)
            .and_then(|p| p.bestmove);
        observation
    }

    /// Sends an LED command unless it is already showing
    fn set_leds(&mut self, command: LedCommand) {
        let command = if self.session.rotate180 {
            command.rotated()
        } else {
            command
        };
        if self.last_leds.as_ref() == Some(&command) {
            return;
        }
        self.io.leds.apply(&command);
        self.last_leds = Some(command);
    }

    fn engine(&mut self, role: EngineRole) -> &mut Engine {
        self.engines.ensure(
            role,
            &self.session.game_settings,
            self.io.engines.as_ref(),
            self.session.id,
        )
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Leds(command) => self.set_leds(command),
            Effect::StopEngines => self.engines.stop_all(),
            Effect::RequestBestmove { reissue } => {
                let board = self.session.board.clone();
                if !self.engine(EngineRole::Game).go(&board, reissue) {
                    debug!("Already searching this position");
                }
            }
            Effect::ForceEngineMove => {
                let forced = self
                    .engines
                    .get(EngineRole::Game)
                    .is_some_and(|e| e.interrupt_bestmove());
                if !forced {
                    debug!("Nothing to force yet");
                }
            }
            Effect::RequestHint => {
                let board = self.session.board.clone();
                let root_moves = self.session.hint_root_moves.clone();
                request_position(self.engine(EngineRole::Hint), &board, root_moves);
            }
            Effect::RequestAnalysis => {
                let board = self.session.board.clone();
                request_position(self.engine(EngineRole::Analysis), &board, None);
            }
            Effect::PruneAnalysis { ply } => self.engines.prune_after(ply),
            Effect::LoadBook { name } => self.load_book(&name),
            Effect::PersistSettings => {
                if let Err(e) = self.settings.save_game_settings(&self.session.game_settings) {
                    error!("Could not save game settings: {}", e);
                }
            }
            Effect::PersistBoardSettings => {
                if let Err(e) = self.settings.save_board_settings(&self.session.board_settings) {
                    error!("Could not save board settings: {}", e);
                }
            }
            Effect::RefreshSavedGames => match self.io.archive.list() {
                Ok(games) => {
                    self.session.saved_games = games;
                    if self.session.saved_game_index >= self.session.saved_games.len() {
                        self.session.saved_game_index = 0;
                    }
                }
                Err(e) => warn!("Could not list saved games: {}", e),
            },
            Effect::RefreshCatalog => {
                self.session.catalog = Catalog::scan(&self.engines_dir, &self.books_dir);
            }
            Effect::LoadSavedGame { name } => self.load_game(&name),
            Effect::SaveGame { name } => self.save_game(name),
            Effect::DeleteSavedGame { name } => match self.io.archive.delete(&name) {
                Ok(()) => info!("Deleted saved game {}", name),
                Err(e) => {
                    warn!("Could not delete {}: {}", name, e);
                    self.session.banner = Some(e.to_string());
                }
            },
            Effect::Quit(reason) => {
                self.engines.stop_all();
                self.set_leds(LedCommand::Off);
                self.quit = Some(reason);
            }
        }
    }

    fn load_book(&mut self, name: &str) {
        self.session.depleted_book = false;
        self.session.opening_book = None;
        if name.is_empty() {
            return;
        }
        let path = self.books_dir.join(name);
        match OpeningBook::from_tsv_path(&path) {
            Ok(book) => {
                info!("Loaded opening book {}", name);
                self.session.opening_book = Some(Arc::new(book));
            }
            Err(e) => {
                warn!("Could not load opening book {}: {}", path.display(), e);
                self.session.banner = Some(format!("Opening book {} unavailable", name));
            }
        }
    }

    fn load_game(&mut self, name: &str) {
        let loaded = self
            .io
            .archive
            .load(name)
            .and_then(|saved| saved.replay(name).map(|board| (saved, board)));
        match loaded {
            Ok((saved, board)) => {
                info!("Loaded {} at ply {}", name, board.ply());
                self.session.change_setting(SettingChange::PlayWhite(saved.play_white));
                self.session.change_setting(SettingChange::HumanGame(saved.human_game));
                self.session.board = board;
            }
            Err(e) => {
                warn!("Could not load {}: {}", name, e);
                self.session.resuming = false;
                self.session.banner = Some(e.to_string());
            }
        }
    }

    fn save_game(&mut self, name: String) {
        let name = if name.is_empty() {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            format!("game_{}", secs)
        } else {
            name
        };
        let saved = SavedGame::capture(&self.session.board, self.session.play_white, self.session.human_game);
        match self.io.archive.save(&name, &saved) {
            Ok(()) => {
                info!("Saved game as {}", name);
                self.session.terminal_print(format!("Saved as {}", name));
                self.apply(Effect::RefreshSavedGames);
            }
            Err(e) => {
                error!("Could not save {}: {}", name, e);
                self.session.banner = Some(e.to_string());
            }
        }
    }

    /// Keeps the extended views fed and copies engine output for display
    fn refresh_views(&mut self) {
        if self.state.is_game() && self.state != GameState::GameExit {
            let board = self.session.board.clone();
            if self.session.show_extended_analysis {
                self.engine(EngineRole::Analysis).update_extended(&board, None);
            }
            if self.session.show_extended_hint {
                let root_moves = self.session.hint_root_moves.clone();
                request_position(self.engine(EngineRole::Hint), &board, root_moves);
            }
        }

        let analysis = self.engines.get(EngineRole::Analysis);
        let display = &mut self.session.display;
        display.score = analysis.and_then(|e| e.score_text());
        display.history = analysis.map(|e| e.history_rows()).unwrap_or_default();
        display.extended_complete = analysis.is_some_and(|e| e.extended_complete());
        display.hint = self.session.hint_bestmove.clone();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.engines.stop_all();
    }
}
