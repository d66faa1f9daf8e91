//! The game and menu state machine.
//!
//! `transition` is pure with respect to the outside world: it reads and
//! updates the [`Session`], and describes everything else it needs done as
//! [`Effect`]s for the caller to apply.

use chess::{ChessMove, Color};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::engine::EngineReport;
use crate::error::MachineError;
use crate::game::board::{differing_squares, VirtualBoard};
use crate::game::detect::{detect_moves, detect_take_back};
use crate::game::rules::{color_to_string, Outcome, Termination};
use crate::models::{
    Command, Effect, GameState, LedCommand, LedPattern, Session, SettingChange, TimeControl,
};

const STARTUP_LEDS: Duration = Duration::from_secs(1);
/// How long the board may disagree with the game before it is reported
const MISMATCH_GRACE: Duration = Duration::from_millis(1500);
/// Caller-side budget for one engine search
const AI_BUDGET: Duration = Duration::from_secs(30);
/// Time a failed game engine is left alone before the move is asked for again
const ENGINE_RETRY: Duration = Duration::from_secs(2);
const ENGINE_FAILED: &str = "Engine failed";
const MAX_CUSTOM_MINUTES: u32 = 180;
const MAX_CUSTOM_INCREMENT: u32 = 60;

/// What the outside world looked like at a tick
#[derive(Debug, Clone)]
pub struct Observation {
    pub now: Instant,
    /// Physical placement, already turned to the virtual board's orientation
    pub physical: Option<String>,
    /// Latest request of the game engine
    pub engine: Option<EngineReport>,
    pub hint_bestmove: Option<String>,
    pub calibration_done: bool,
    /// The exit gesture is being held on the board
    pub exit_pending: bool,
}

impl Observation {
    pub fn at(now: Instant) -> Self {
        Observation {
            now,
            physical: None,
            engine: None,
            hint_bestmove: None,
            calibration_done: false,
            exit_pending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Command { command: Command, at: Instant },
    Tick(Observation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: GameState,
    pub effects: Vec<Effect>,
}

/// Transition under construction
struct Step {
    state: GameState,
    effects: Vec<Effect>,
}

impl Step {
    fn new(state: GameState) -> Self {
        Step {
            state,
            effects: Vec::new(),
        }
    }

    fn emit(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn leds(&mut self, command: LedCommand) {
        self.effects.push(Effect::Leds(command));
    }

    fn switch(&mut self, to: GameState, session: &mut Session) {
        if to == self.state {
            return;
        }
        debug!("Switching states: {} -> {}", self.state, to);
        if self.state.keeps_engines() && !to.keeps_engines() {
            self.effects.push(Effect::StopEngines);
            session.clear_view_flags();
        }
        self.state = to;
    }

    fn finish(self) -> Transition {
        Transition {
            state: self.state,
            effects: self.effects,
        }
    }
}

/// Advances the machine by one event.
///
/// A command the current state does not accept is an error in strict mode
/// and a logged no-op otherwise.
pub fn transition(
    state: GameState,
    event: &Event,
    session: &mut Session,
) -> Result<Transition, MachineError> {
    let mut step = Step::new(state);
    match event {
        Event::Command { command, at } => {
            if !on_command(state, command, *at, session, &mut step) {
                if session.strict {
                    return Err(MachineError::InvalidCommand {
                        state,
                        command: command.clone(),
                    });
                }
                error!("Command {} is not valid in state {}, ignoring", command, state);
            }
        }
        Event::Tick(observation) => on_tick(state, observation, session, &mut step),
    }
    Ok(step.finish())
}

/// Applies a command; false when the state does not accept it
fn on_command(
    state: GameState,
    command: &Command,
    at: Instant,
    session: &mut Session,
    step: &mut Step,
) -> bool {
    if let Command::Configure(changes) = command {
        if !accepts_settings(state) {
            return false;
        }
        for change in changes {
            session.change_setting(change.clone());
        }
        return true;
    }
    if state.is_game() {
        return on_game_command(state, command, session, step);
    }

    use GameState as S;
    match (state, command) {
        (S::Home, Command::NewGame) => {
            enter_new_game(session, step);
        }
        (S::Home, Command::ResumeGame) => {
            session.change_setting(SettingChange::SavedGameIndex(0));
            step.emit(Effect::RefreshSavedGames);
            step.switch(S::ResumeGame, session);
        }
        (S::Home, Command::Calibration) => step.switch(S::CalibrationMenu, session),
        (S::Home, Command::CalibrationRemote) => {
            step.leds(LedCommand::Set {
                pattern: LedPattern::Setup,
            });
            step.switch(S::CalibrationReturnHome, session);
        }
        (S::Home, Command::Options) => {
            step.emit(Effect::RefreshCatalog);
            step.switch(S::Options, session);
        }

        (S::CalibrationMenu, Command::Setup) => {
            step.leds(LedCommand::Set {
                pattern: LedPattern::Setup,
            });
            step.switch(S::CalibrationPartial, session);
        }
        (S::CalibrationMenu, Command::NewSetup) => {
            step.leds(LedCommand::Set {
                pattern: LedPattern::All,
            });
            step.switch(S::Calibration, session);
        }
        (S::CalibrationMenu, Command::Done | Command::Back) => step.switch(S::Home, session),
        (S::Calibration | S::CalibrationPartial, Command::Back) => {
            step.leds(LedCommand::Off);
            step.switch(S::CalibrationMenu, session);
        }
        (S::CalibrationReturnHome, Command::Back) => {
            step.leds(LedCommand::Off);
            step.switch(S::Home, session);
        }

        (S::ResumeGame, Command::Back) => step.switch(S::Home, session),
        (S::ResumeGame, Command::DeleteGame) => {
            if session.selected_saved_game().is_some() {
                step.switch(S::DeleteGame, session);
            } else {
                session.banner = Some("No saved game selected".to_string());
            }
        }
        (S::ResumeGame, Command::ResumeGame) => match session.selected_saved_game().cloned() {
            Some(name) => {
                info!("Resuming saved game {}", name);
                step.emit(Effect::LoadSavedGame { name });
                step.leds(LedCommand::Off);
                session.resuming = true;
                step.switch(S::NewGame, session);
            }
            None => session.banner = Some("No saved games".to_string()),
        },
        (S::DeleteGame, Command::Confirm) => {
            if let Some(name) = session.selected_saved_game().cloned() {
                step.emit(Effect::DeleteSavedGame { name });
            }
            session.saved_game_index = 0;
            step.emit(Effect::RefreshSavedGames);
            step.switch(S::ResumeGame, session);
        }
        (S::DeleteGame, Command::Back) => step.switch(S::ResumeGame, session),

        (S::Options, Command::Done) => {
            step.emit(Effect::PersistSettings);
            step.emit(Effect::PersistBoardSettings);
            step.switch(S::Home, session);
        }
        (S::Options, Command::Back) => step.switch(S::Home, session),

        (S::NewGame, Command::Back) => {
            session.resuming = false;
            step.switch(S::Home, session);
        }
        (S::NewGame, Command::Start) => start_game(at, session, step),
        (S::NewGame, Command::HumanGame) => {
            session.change_setting(SettingChange::HumanGame(true));
        }
        (S::NewGame, Command::ComputerGame) => {
            session.change_setting(SettingChange::HumanGame(false));
        }
        (S::NewGame, Command::FlipBoard) => {
            let flipped = !session.rotate180;
            session.change_setting(SettingChange::Rotate180(flipped));
        }
        (S::NewGame, Command::UseBoardPosition) => {
            let toggled = !session.use_board_position;
            session.change_setting(SettingChange::UseBoardPosition(toggled));
        }
        (S::NewGame, Command::SideToMove) => {
            let side = session.side_to_move.flipped();
            session.change_setting(SettingChange::SideToMove(side));
        }
        (S::NewGame, Command::SwapColor) => {
            let white = !session.play_white;
            session.change_setting(SettingChange::PlayWhite(white));
        }
        (S::NewGame, Command::Time(tc)) => {
            session.change_setting(SettingChange::TimeControl(*tc));
            if *tc == TimeControl::Custom {
                step.switch(S::SelectTime, session);
            }
        }
        (S::NewGame, Command::DepthLess | Command::DepthMore) => {
            let depth = session.game_settings.game_engine.depth;
            let depth = if *command == Command::DepthMore {
                depth.saturating_add(1)
            } else {
                depth.saturating_sub(1)
            };
            let depth = depth.clamp(1, session.max_depth.max(1));
            session.change_setting(SettingChange::EngineDepth(depth));
        }
        (S::NewGame, Command::SelectEngine) => {
            step.emit(Effect::RefreshCatalog);
            step.switch(S::SelectEngine, session);
        }
        (S::NewGame, Command::Avatar) => {
            session.change_setting(SettingChange::EngineName("avatar".to_string()));
            step.emit(Effect::RefreshCatalog);
            step.switch(S::SelectWeights, session);
        }
        (S::NewGame, Command::SelectBook) => {
            step.emit(Effect::RefreshCatalog);
            step.switch(S::SelectBook, session);
        }

        (S::SelectTime, Command::AdjustMinutes(delta)) => {
            let minutes = adjust(session.time_total_minutes, *delta, 1, MAX_CUSTOM_MINUTES);
            session.change_setting(SettingChange::TimeTotalMinutes(minutes));
        }
        (S::SelectTime, Command::AdjustSeconds(delta)) => {
            let seconds = adjust(session.time_increment_seconds, *delta, 0, MAX_CUSTOM_INCREMENT);
            session.change_setting(SettingChange::TimeIncrementSeconds(seconds));
        }
        (S::SelectEngine, Command::Done) if session.game_settings.game_engine.engine == "avatar" => {
            step.switch(S::SelectWeights, session);
        }
        (
            S::SelectTime | S::SelectEngine | S::SelectWeights | S::SelectBook,
            Command::Done | Command::Back,
        ) => step.switch(S::NewGame, session),

        (S::Save, Command::Save) => {
            let name = session.name_to_save.trim().to_string();
            step.emit(Effect::SaveGame { name });
            step.switch(S::GameResume, session);
        }
        (S::Save, Command::Back) => step.switch(S::GameResume, session),

        _ => return false,
    }
    true
}

/// Menus where structured setting changes may arrive
fn accepts_settings(state: GameState) -> bool {
    matches!(
        state,
        GameState::Home
            | GameState::Options
            | GameState::ResumeGame
            | GameState::NewGame
            | GameState::SelectTime
            | GameState::SelectEngine
            | GameState::SelectWeights
            | GameState::SelectBook
            | GameState::Save
    )
}

fn adjust(value: u32, delta: i32, min: u32, max: u32) -> u32 {
    let value = value as i64 + delta as i64;
    value.clamp(min as i64, max as i64) as u32
}

fn enter_new_game(session: &mut Session, step: &mut Step) {
    session.resuming = false;
    session.board = VirtualBoard::new();
    session.result = None;
    step.leds(LedCommand::Off);
    step.switch(GameState::NewGame, session);
}

fn start_game(at: Instant, session: &mut Session, step: &mut Step) {
    if session.resuming {
        info!("Resuming game at ply {}", session.board.ply());
    } else if session.use_board_position {
        let Some(placement) = session.reading.as_ref().map(|r| r.oriented(session.rotate180)) else {
            session.banner = Some("Board position is not available".to_string());
            return;
        };
        match VirtualBoard::from_placement(&placement, session.side_to_move.to_color()) {
            Ok(board) => session.board = board,
            Err(e) => {
                warn!("Cannot start from the board position: {}", e);
                session.banner = Some(format!("Invalid position: {}", e));
                return;
            }
        }
    } else {
        session.board = VirtualBoard::new();
    }

    let engine = session.game_settings.game_engine.clone();
    session.id = Uuid::new_v4();
    session.resuming = false;
    session.is_rom = Catalog::is_rom(&engine.engine);
    session.result = None;
    session.banner = None;
    session.depleted_book = false;
    session.opening_book = None;
    session.ai_move = None;
    session.pending_moves.clear();
    session.take_back_plies = 0;
    session.reissue_bestmove = false;
    session.timers = Default::default();
    session.clear_view_flags();
    let preset = session
        .time_control
        .preset(session.time_total_minutes, session.time_increment_seconds);
    session.clock.start(preset, &session.board, at);
    if !session.book.is_empty() {
        step.emit(Effect::LoadBook {
            name: session.book.clone(),
        });
    }

    let opponent = if session.human_game {
        "human".to_string()
    } else {
        format!("{} depth {}", engine.engine, engine.depth)
    };
    info!(
        "Starting game: {} plays {} against {}, {}",
        session.id,
        color_to_string(session.human_color()),
        opponent,
        session.time_control.name()
    );
    session.terminal_print(format!("New game against {}", opponent));
    step.leds(LedCommand::Off);
    step.switch(GameState::GameResume, session);
}

fn on_game_command(
    state: GameState,
    command: &Command,
    session: &mut Session,
    step: &mut Step,
) -> bool {
    use GameState as S;
    let playing = !matches!(state, S::GameExit | S::GameOver);
    match command {
        Command::Hint if playing => {
            session.show_hint = true;
            session.hint_bestmove = None;
            step.emit(Effect::RequestHint);
        }
        Command::ExtendedHint if playing => {
            session.show_extended_hint = !session.show_extended_hint;
            if session.show_extended_hint && session.show_extended_analysis {
                session.show_extended_analysis = false;
                session.show_analysis = false;
            }
            session.show_hint = session.show_extended_hint;
            if session.show_hint {
                step.emit(Effect::RequestHint);
            }
        }
        Command::Analysis if state != S::GameExit => {
            session.show_analysis = true;
            step.emit(Effect::RequestAnalysis);
        }
        Command::ExtendedAnalysis if state != S::GameExit => {
            session.show_extended_analysis = !session.show_extended_analysis;
            if session.show_extended_analysis && session.show_extended_hint {
                session.show_extended_hint = false;
                session.show_hint = false;
            }
            session.show_analysis = session.show_extended_analysis;
            if session.show_analysis {
                step.emit(Effect::RequestAnalysis);
            }
        }
        Command::ForceMove if playing => {
            if state == S::GameWaitingAiMove && !session.is_rom {
                step.emit(Effect::ForceEngineMove);
            } else {
                debug!("Force move ignored in state {}", state);
            }
        }
        Command::TakeBack if state != S::GameExit => {
            if session.board.ply() == 0 {
                debug!("Nothing to take back");
            } else {
                session.take_back_plies = 0;
                step.switch(S::GameDoTakeBack, session);
            }
        }
        Command::Save => step.switch(S::Save, session),
        Command::Exit if state == S::GameExit || state == S::GameOver => {
            info!("Leaving game {}", session.id);
            step.leds(LedCommand::Off);
            step.switch(S::Home, session);
        }
        Command::Exit => step.switch(S::GameExit, session),
        Command::Back if state == S::GameExit => step.switch(S::GameResume, session),
        Command::NewGame => enter_new_game(session, step),
        _ => return false,
    }
    true
}

fn on_tick(state: GameState, obs: &Observation, session: &mut Session, step: &mut Step) {
    use GameState as S;
    let now = obs.now;

    if state.is_game() && !matches!(state, S::GameExit | S::GameOver) {
        session.clock.update(&session.board, now);
        if session.show_hint {
            session.hint_bestmove = obs.hint_bestmove.clone();
        }
        if let Some(outcome) = game_over(session) {
            info!("Game over: {}", outcome);
            session.result = Some(outcome.to_string());
            session.terminal_print(format!("Game over: {}", outcome));
            step.leds(LedCommand::Flash {
                pattern: LedPattern::Corners,
            });
            step.switch(S::GameOver, session);
            return;
        }
    }

    match state {
        S::Init => {
            session.timers.startup_until = Some(now + STARTUP_LEDS);
            step.leds(LedCommand::Set {
                pattern: LedPattern::All,
            });
            step.switch(S::StartupLeds, session);
        }
        S::StartupLeds => {
            if session.timers.startup_until.is_some_and(|t| now < t) {
                return;
            }
            session.timers.startup_until = None;
            step.leds(LedCommand::Off);
            let needs_calibration = session.reading.as_ref().is_some_and(|r| r.needs_calibration);
            if needs_calibration {
                info!("Board needs calibration");
                step.switch(S::CalibrationReturnHome, session);
            } else {
                step.switch(S::Home, session);
            }
        }
        S::Calibration | S::CalibrationPartial if obs.calibration_done => {
            step.leds(LedCommand::Off);
            step.switch(S::CalibrationMenu, session);
        }
        S::CalibrationReturnHome if obs.calibration_done => {
            step.leds(LedCommand::Off);
            step.switch(S::Home, session);
        }
        S::GameExit | S::GameOver | S::Save => session.clock.hold(&session.board, now),
        S::GameResume => match mismatch(session, obs) {
            Some(squares) => {
                step.leds(LedCommand::Set {
                    pattern: LedPattern::Squares(squares),
                });
                step.switch(S::GamePiecesWrongPlaceResume, session);
            }
            None => route_turn(session, step),
        },
        S::GamePiecesWrongPlaceResume
        | S::GamePiecesWrongPlaceAiMove
        | S::GamePiecesWrongPlaceTakeBack
        | S::GamePiecesWrongPlaceInvalidPosition => wrong_place(state, obs, session, step),
        S::GameWaitingUserMove => waiting_user_move(obs, session, step),
        S::GameDoUserMove => {
            for mv in std::mem::take(&mut session.pending_moves) {
                play_user_move(mv, session);
            }
            session.timers.mismatch_since = None;
            session.hide_transient_views();
            route_turn(session, step);
        }
        S::GameRequestAiMove => request_ai_move(now, session, step),
        S::GameWaitingAiMove => waiting_ai_move(obs, session, step),
        S::GameDoAiMove => do_ai_move(session, step),
        S::GameDoTakeBack => do_take_back(obs, session, step),
        _ => {}
    }
}

fn game_over(session: &Session) -> Option<Outcome> {
    if let Some(outcome) = session.board.outcome() {
        return Some(outcome);
    }
    session.clock.flagged().map(|loser| Outcome {
        termination: Termination::Time,
        winner: Some(!loser),
    })
}

/// Squares that differ between the virtual and the physical board
fn mismatch(session: &Session, obs: &Observation) -> Option<Vec<String>> {
    let physical = obs.physical.as_deref()?;
    let placement = session.board.placement();
    if physical == placement {
        return None;
    }
    Some(differing_squares(&placement, physical))
}

fn route_turn(session: &mut Session, step: &mut Step) {
    if session.is_engine_turn() {
        step.switch(GameState::GameRequestAiMove, session);
    } else {
        step.switch(GameState::GameWaitingUserMove, session);
    }
}

fn wrong_place(state: GameState, obs: &Observation, session: &mut Session, step: &mut Step) {
    let Some(physical) = obs.physical.as_deref() else {
        return;
    };
    match mismatch(session, obs) {
        None => {
            session.timers.mismatch_since = None;
            session.banner = None;
            step.leds(LedCommand::Off);
            route_turn(session, step);
        }
        Some(squares) => {
            if state == GameState::GamePiecesWrongPlaceInvalidPosition && !session.is_engine_turn() {
                if let Some(moves) = detect_moves(&session.board, physical, session.human_game) {
                    session.pending_moves = moves;
                    session.banner = None;
                    step.switch(GameState::GameDoUserMove, session);
                    return;
                }
            }
            step.leds(LedCommand::Set {
                pattern: LedPattern::Squares(squares),
            });
        }
    }
}

fn waiting_user_move(obs: &Observation, session: &mut Session, step: &mut Step) {
    let Some(physical) = obs.physical.as_deref() else {
        return;
    };
    let now = obs.now;
    // Kings are off their squares while the exit gesture is held
    if obs.exit_pending {
        session.timers.mismatch_since = None;
        step.leds(LedCommand::Flash {
            pattern: LedPattern::All,
        });
        return;
    }
    if physical == session.board.placement() {
        session.timers.mismatch_since = None;
        let leds = user_move_leds(session);
        step.leds(leds);
        return;
    }

    if let Some(moves) = detect_moves(&session.board, physical, session.human_game) {
        session.pending_moves = moves;
        session.timers.mismatch_since = None;
        step.switch(GameState::GameDoUserMove, session);
        return;
    }

    if !session.is_rom {
        // Engine games undo the engine's reply together with the human move
        let wanted = if session.human_game {
            1
        } else {
            session.board.ply().min(2)
        };
        if detect_take_back(&session.board, physical) == Some(wanted) {
            info!("Take back detected on the board");
            session.take_back_plies = wanted;
            session.timers.mismatch_since = None;
            step.switch(GameState::GameDoTakeBack, session);
            return;
        }
    }

    let since = *session.timers.mismatch_since.get_or_insert(now);
    if now.saturating_duration_since(since) >= MISMATCH_GRACE {
        let squares = differing_squares(&session.board.placement(), physical);
        debug!("Invalid position, wrong squares: {:?}", squares);
        session.timers.mismatch_since = None;
        step.leds(LedCommand::Set {
            pattern: LedPattern::Squares(squares),
        });
        step.switch(GameState::GamePiecesWrongPlaceInvalidPosition, session);
    }
}

fn user_move_leds(session: &Session) -> LedCommand {
    let board = &session.board;
    if board.is_check() {
        return LedCommand::Set {
            pattern: LedPattern::squares(&[board.king_square(board.side_to_move())]),
        };
    }
    if session.clock.time_warning(board) {
        return LedCommand::Flash {
            pattern: LedPattern::Corners,
        };
    }
    if session.show_hint {
        if let Some(mv) = session.hint_bestmove.as_deref().and_then(|m| board.parse_uci(m)) {
            return LedCommand::SetAndFlash {
                set: LedPattern::squares(&[mv.get_source()]),
                flash: LedPattern::squares(&[mv.get_dest()]),
            };
        }
    }
    LedCommand::Off
}

fn play_user_move(mv: ChessMove, session: &mut Session) {
    let mover = session.board.side_to_move();
    if session.board.push(mv) {
        info!("User move {} ({})", mv, color_to_string(mover));
        session.terminal_print(format!("{}: {}", color_to_string(mover), mv));
    } else {
        error!("Detected move {} is not legal, dropped", mv);
    }
}

fn ai_color(session: &Session) -> Color {
    !session.human_color()
}

fn request_ai_move(now: Instant, session: &mut Session, step: &mut Step) {
    if !session.is_engine_turn() {
        step.switch(GameState::GameWaitingUserMove, session);
        return;
    }
    session.timers.ai_min_until = Some(now + session.clock.ai_pause(ai_color(session)));
    session.ai_move = None;

    if !session.depleted_book {
        let depth = session.game_settings.game_engine.depth;
        let probe = session
            .opening_book
            .as_ref()
            .map(|book| book.probe(&session.board, depth));
        match probe {
            Some(Some(mv)) => {
                info!("Book move {}", mv);
                session.ai_move = Some(mv);
                step.switch(GameState::GameWaitingAiMove, session);
                return;
            }
            Some(None) => {
                debug!("Out of book at ply {}", session.board.ply());
                session.depleted_book = true;
            }
            None => {}
        }
    }

    let reissue = std::mem::take(&mut session.reissue_bestmove);
    step.emit(Effect::RequestBestmove { reissue });
    session.timers.ai_budget_until = Some(now + AI_BUDGET);
    step.leds(LedCommand::Flash {
        pattern: LedPattern::from_name(&session.game_settings.led.thinking),
    });
    step.switch(GameState::GameWaitingAiMove, session);
}

fn waiting_ai_move(obs: &Observation, session: &mut Session, step: &mut Step) {
    let now = obs.now;
    if !session.is_rom && !session.human_game && !obs.exit_pending && session.board.ply() > 0 {
        if let Some(physical) = obs.physical.as_deref() {
            if detect_take_back(&session.board, physical) == Some(1) {
                info!("Human move taken back while the engine was thinking");
                session.take_back_plies = 1;
                step.switch(GameState::GameDoTakeBack, session);
                return;
            }
        }
    }

    let paused = session.timers.ai_min_until.is_some_and(|t| now < t);
    if session.ai_move.is_some() {
        if !paused {
            step.switch(GameState::GameDoAiMove, session);
        }
        return;
    }

    let Some(report) = &obs.engine else {
        return;
    };
    if let Some(failure) = &report.failure {
        let banner = format!("{}: {}", ENGINE_FAILED, failure);
        if session.banner.as_deref() != Some(banner.as_str()) {
            error!("{}", banner);
            session.banner = Some(banner);
        }
        let retry_at = *session.timers.engine_retry_at.get_or_insert(now + ENGINE_RETRY);
        if now >= retry_at {
            info!("Asking the game engine again");
            session.timers.engine_retry_at = None;
            session.reissue_bestmove = true;
            step.switch(GameState::GameRequestAiMove, session);
        }
        return;
    }
    session.timers.engine_retry_at = None;
    if session.banner.as_deref().is_some_and(|b| b.starts_with(ENGINE_FAILED)) {
        session.banner = None;
    }
    if report.fen.as_deref() != Some(session.board.fen().as_str()) {
        return;
    }

    let ready = report.complete || (report.interrupted && report.bestmove.is_some());
    if ready {
        match &report.bestmove {
            None => {
                warn!("Engine returned no move, asking again");
                session.reissue_bestmove = true;
                step.switch(GameState::GameRequestAiMove, session);
            }
            Some(mv) if report.interrupted || !paused => {
                session.ai_move = Some(mv.clone());
                step.switch(GameState::GameDoAiMove, session);
            }
            Some(_) => {}
        }
        return;
    }

    if session.timers.ai_budget_until.is_some_and(|t| now >= t) {
        warn!(
            "Engine {} still thinking after {} s",
            session.game_settings.game_engine.engine,
            AI_BUDGET.as_secs()
        );
        session.timers.ai_budget_until = Some(now + AI_BUDGET);
    }
}

fn do_ai_move(session: &mut Session, step: &mut Step) {
    let proposed = session.ai_move.take().unwrap_or_default();
    match session.board.push_uci(&proposed) {
        Some(mv) => {
            info!("AI move {}", mv);
            session.terminal_print(format!("{}: {}", color_to_string(!session.board.side_to_move()), mv));
            session.banner = None;
            session.hide_transient_views();
            step.leds(LedCommand::Set {
                pattern: LedPattern::squares(&[mv.get_source(), mv.get_dest()]),
            });
            step.switch(GameState::GamePiecesWrongPlaceAiMove, session);
        }
        None => {
            error!("Engine returned illegal move {:?}", proposed);
            session.banner = Some(format!("Engine returned an illegal move: {}", proposed));
            session.reissue_bestmove = true;
            step.switch(GameState::GameRequestAiMove, session);
        }
    }
}

fn do_take_back(obs: &Observation, session: &mut Session, step: &mut Step) {
    let exact = std::mem::take(&mut session.take_back_plies);
    let mut undone = 0;
    if exact > 0 {
        while undone < exact && session.board.pop().is_some() {
            undone += 1;
        }
    } else if session.board.pop().is_some() {
        undone = 1;
        // Back to a position where the human is on move
        if session.is_engine_turn() && session.board.pop().is_some() {
            undone += 1;
        }
    }
    info!("Took back {} plies, now at ply {}", undone, session.board.ply());
    session.terminal_print(format!("Take back: {} plies", undone));
    step.emit(Effect::PruneAnalysis {
        ply: session.board.ply(),
    });
    session.depleted_book = false;
    session.result = None;
    session.ai_move = None;
    session.reissue_bestmove = false;
    session.hide_transient_views();

    match mismatch(session, obs) {
        Some(squares) => {
            step.leds(LedCommand::Set {
                pattern: LedPattern::Squares(squares),
            });
            step.switch(GameState::GamePiecesWrongPlaceTakeBack, session);
        }
        None => {
            step.leds(LedCommand::Off);
            step.switch(GameState::GameResume, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoardSettings, GameSettings, Side};
    use crate::sensor::Reading;

    fn session() -> Session {
        Session::new(GameSettings::default(), BoardSettings::default())
    }

    fn command(state: GameState, command: Command, session: &mut Session) -> Transition {
        transition(
            state,
            &Event::Command {
                command,
                at: Instant::now(),
            },
            session,
        )
        .unwrap()
    }

    fn tick(state: GameState, physical: Option<String>, session: &mut Session) -> Transition {
        let obs = Observation {
            physical,
            ..Observation::at(Instant::now())
        };
        transition(state, &Event::Tick(obs), session).unwrap()
    }

    fn played(moves: &[&str]) -> VirtualBoard {
        let mut board = VirtualBoard::new();
        for mv in moves {
            board.push_uci(mv).unwrap();
        }
        board
    }

    #[test]
    fn test_startup_sequence() {
        let mut s = session();
        let t = tick(GameState::Init, None, &mut s);
        assert_eq!(t.state, GameState::StartupLeds);
        s.timers.startup_until = Some(Instant::now());
        let t = tick(GameState::StartupLeds, None, &mut s);
        assert_eq!(t.state, GameState::Home);
        assert_eq!(t.effects, vec![Effect::Leds(LedCommand::Off)]);
    }

    #[test]
    fn test_startup_goes_to_calibration_when_needed() {
        let mut s = session();
        let start = VirtualBoard::new().placement();
        s.reading = Some(Reading::new(&start, &start, true).unwrap());
        s.timers.startup_until = Some(Instant::now());
        let t = tick(GameState::StartupLeds, None, &mut s);
        assert_eq!(t.state, GameState::CalibrationReturnHome);
    }

    #[test]
    fn test_invalid_command_is_a_no_op_unless_strict() {
        let mut s = session();
        let t = command(GameState::Home, Command::TakeBack, &mut s);
        assert_eq!(t.state, GameState::Home);
        assert!(t.effects.is_empty());

        s.strict = true;
        let err = transition(
            GameState::Home,
            &Event::Command {
                command: Command::TakeBack,
                at: Instant::now(),
            },
            &mut s,
        );
        assert!(matches!(err, Err(MachineError::InvalidCommand { .. })));
    }

    #[test]
    fn test_new_game_options() {
        let mut s = session();
        let t = command(GameState::Home, Command::NewGame, &mut s);
        assert_eq!(t.state, GameState::NewGame);
        command(GameState::NewGame, Command::SwapColor, &mut s);
        command(GameState::NewGame, Command::DepthMore, &mut s);
        let t = command(GameState::NewGame, Command::Time(TimeControl::Custom), &mut s);
        assert_eq!(t.state, GameState::SelectTime);
        command(GameState::SelectTime, Command::AdjustMinutes(-10), &mut s);
        command(GameState::SelectTime, Command::AdjustSeconds(10), &mut s);
        assert!(!s.play_white);
        assert_eq!(s.game_settings.game_engine.depth, 6);
        assert_eq!(s.time_total_minutes, 1);
        assert_eq!(s.time_increment_seconds, 13);
        let t = command(GameState::SelectTime, Command::Done, &mut s);
        assert_eq!(t.state, GameState::NewGame);
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut s = session();
        s.max_depth = 5;
        command(GameState::NewGame, Command::DepthMore, &mut s);
        assert_eq!(s.game_settings.game_engine.depth, 5);
        s.game_settings.game_engine.depth = 1;
        command(GameState::NewGame, Command::DepthLess, &mut s);
        assert_eq!(s.game_settings.game_engine.depth, 1);
    }

    #[test]
    fn test_start_game_and_first_engine_move() {
        let mut s = session();
        s.play_white = false;
        s.book = "main".to_string();
        let t = command(GameState::NewGame, Command::Start, &mut s);
        assert_eq!(t.state, GameState::GameResume);
        assert!(t.effects.contains(&Effect::LoadBook {
            name: "main".to_string()
        }));

        let start = VirtualBoard::new().placement();
        let t = tick(GameState::GameResume, Some(start), &mut s);
        assert_eq!(t.state, GameState::GameRequestAiMove);
        let t = tick(GameState::GameRequestAiMove, None, &mut s);
        assert_eq!(t.state, GameState::GameWaitingAiMove);
        assert!(t.effects.contains(&Effect::RequestBestmove { reissue: false }));
    }

    #[test]
    fn test_start_from_invalid_board_position_stays() {
        let mut s = session();
        s.use_board_position = true;
        let layout = "8/8/8/8/8/8/8/8";
        s.reading = Some(Reading::new(layout, layout, false).unwrap());
        let t = command(GameState::NewGame, Command::Start, &mut s);
        assert_eq!(t.state, GameState::NewGame);
        assert!(s.banner.is_some());
    }

    #[test]
    fn test_start_from_board_position_with_black_to_move() {
        let mut s = session();
        s.use_board_position = true;
        s.side_to_move = Side::Black;
        let layout = played(&["e2e4"]).placement();
        s.reading = Some(Reading::new(&layout, &layout, false).unwrap());
        let t = command(GameState::NewGame, Command::Start, &mut s);
        assert_eq!(t.state, GameState::GameResume);
        assert_eq!(s.board.side_to_move(), Color::Black);
        assert_eq!(s.board.placement(), layout);
    }

    #[test]
    fn test_user_move_is_detected_and_played() {
        let mut s = session();
        s.human_game = true;
        let physical = played(&["e2e4"]).placement();
        let t = tick(GameState::GameWaitingUserMove, Some(physical), &mut s);
        assert_eq!(t.state, GameState::GameDoUserMove);
        let t = tick(GameState::GameDoUserMove, None, &mut s);
        assert_eq!(t.state, GameState::GameWaitingUserMove);
        assert_eq!(s.board.uci_moves(), vec!["e2e4".to_string()]);
    }

    #[test]
    fn test_unexplained_layout_becomes_invalid_position_after_grace() {
        let mut s = session();
        s.human_game = true;
        let physical = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBN1".to_string();
        let t = tick(GameState::GameWaitingUserMove, Some(physical.clone()), &mut s);
        assert_eq!(t.state, GameState::GameWaitingUserMove);
        s.timers.mismatch_since = Some(Instant::now() - MISMATCH_GRACE);
        let t = tick(GameState::GameWaitingUserMove, Some(physical), &mut s);
        assert_eq!(t.state, GameState::GamePiecesWrongPlaceInvalidPosition);
        assert!(t.effects.contains(&Effect::Leds(LedCommand::Set {
            pattern: LedPattern::squares(&["h1"])
        })));
    }

    #[test]
    fn test_held_exit_gesture_is_not_an_invalid_position() {
        let mut s = session();
        // Kings moved to d5 and e4 for the game exit
        let physical = "rnbq1bnr/pppppppp/8/3k4/4K3/8/PPPPPPPP/RNBQ1BNR".to_string();
        s.timers.mismatch_since = Some(Instant::now() - MISMATCH_GRACE);
        let obs = Observation {
            physical: Some(physical),
            exit_pending: true,
            ..Observation::at(Instant::now())
        };
        let t = transition(GameState::GameWaitingUserMove, &Event::Tick(obs), &mut s).unwrap();
        assert_eq!(t.state, GameState::GameWaitingUserMove);
        assert_eq!(
            t.effects,
            vec![Effect::Leds(LedCommand::Flash {
                pattern: LedPattern::All
            })]
        );
        assert!(s.timers.mismatch_since.is_none());
    }

    #[test]
    fn test_human_move_taken_back_while_engine_thinks() {
        let mut s = session();
        s.board = played(&["e2e4"]);
        let t = tick(
            GameState::GameWaitingAiMove,
            Some(VirtualBoard::new().placement()),
            &mut s,
        );
        assert_eq!(t.state, GameState::GameDoTakeBack);
        assert_eq!(s.take_back_plies, 1);
        let t = tick(GameState::GameDoTakeBack, Some(VirtualBoard::new().placement()), &mut s);
        assert_eq!(s.board.ply(), 0);
        assert_eq!(t.state, GameState::GameResume);
    }

    #[test]
    fn test_extended_views_exclude_each_other() {
        let mut s = session();
        command(GameState::GameWaitingUserMove, Command::ExtendedHint, &mut s);
        assert!(s.show_extended_hint && s.show_hint);
        command(GameState::GameWaitingUserMove, Command::ExtendedAnalysis, &mut s);
        assert!(s.show_extended_analysis && s.show_analysis);
        assert!(!s.show_extended_hint && !s.show_hint);
        command(GameState::GameWaitingUserMove, Command::ExtendedHint, &mut s);
        assert!(s.show_extended_hint);
        assert!(!s.show_extended_analysis && !s.show_analysis);
    }

    #[test]
    fn test_failed_engine_is_asked_again_after_a_pause() {
        let mut s = session();
        s.play_white = false;
        let failed = EngineReport {
            failure: Some("Engine process exited".to_string()),
            ..EngineReport::default()
        };
        let t0 = Instant::now();
        let at = |now: Instant, report: &EngineReport| Observation {
            engine: Some(report.clone()),
            ..Observation::at(now)
        };
        let t = transition(GameState::GameWaitingAiMove, &Event::Tick(at(t0, &failed)), &mut s).unwrap();
        assert_eq!(t.state, GameState::GameWaitingAiMove);
        assert!(s.banner.as_deref().is_some_and(|b| b.starts_with("Engine failed")));

        let later = t0 + ENGINE_RETRY;
        let t = transition(GameState::GameWaitingAiMove, &Event::Tick(at(later, &failed)), &mut s).unwrap();
        assert_eq!(t.state, GameState::GameRequestAiMove);
        let t = tick(GameState::GameRequestAiMove, None, &mut s);
        assert!(t.effects.contains(&Effect::RequestBestmove { reissue: true }));

        let searching = EngineReport {
            fen: Some(s.board.fen()),
            ..EngineReport::default()
        };
        let now = Instant::now();
        transition(GameState::GameWaitingAiMove, &Event::Tick(at(now, &searching)), &mut s).unwrap();
        assert!(s.banner.is_none());
    }

    #[test]
    fn test_illegal_engine_move_is_reissued() {
        let mut s = session();
        s.play_white = false;
        s.ai_move = Some("e2e5".to_string());
        let t = tick(GameState::GameDoAiMove, None, &mut s);
        assert_eq!(t.state, GameState::GameRequestAiMove);
        assert!(s.reissue_bestmove);
        assert!(s.banner.is_some());
        let t = tick(GameState::GameRequestAiMove, None, &mut s);
        assert!(t.effects.contains(&Effect::RequestBestmove { reissue: true }));
    }

    #[test]
    fn test_engine_move_waits_for_pause_and_matching_position() {
        let mut s = session();
        s.play_white = false;
        let later = Instant::now() + Duration::from_secs(60);
        s.timers.ai_min_until = Some(later);
        let report = EngineReport {
            bestmove: Some("e2e4".to_string()),
            complete: true,
            fen: Some(s.board.fen()),
            ..EngineReport::default()
        };
        let obs = Observation {
            engine: Some(report.clone()),
            ..Observation::at(Instant::now())
        };
        let t = transition(GameState::GameWaitingAiMove, &Event::Tick(obs), &mut s).unwrap();
        assert_eq!(t.state, GameState::GameWaitingAiMove);

        let obs = Observation {
            engine: Some(report),
            ..Observation::at(later)
        };
        let t = transition(GameState::GameWaitingAiMove, &Event::Tick(obs), &mut s).unwrap();
        assert_eq!(t.state, GameState::GameDoAiMove);
        let t = tick(GameState::GameDoAiMove, None, &mut s);
        assert_eq!(t.state, GameState::GamePiecesWrongPlaceAiMove);
        let t = tick(GameState::GamePiecesWrongPlaceAiMove, Some(s.board.placement()), &mut s);
        assert_eq!(t.state, GameState::GameWaitingUserMove);
    }

    #[test]
    fn test_explicit_take_back_in_engine_game_returns_to_human_turn() {
        let mut s = session();
        s.board = played(&["e2e4", "e7e5"]);
        let t = command(GameState::GameWaitingUserMove, Command::TakeBack, &mut s);
        assert_eq!(t.state, GameState::GameDoTakeBack);
        let t = tick(GameState::GameDoTakeBack, Some(VirtualBoard::new().placement()), &mut s);
        assert_eq!(s.board.ply(), 0);
        assert!(t.effects.contains(&Effect::PruneAnalysis { ply: 0 }));
        assert_eq!(t.state, GameState::GameResume);
    }

    #[test]
    fn test_leaving_the_game_stops_engines() {
        let mut s = session();
        s.show_analysis = true;
        let t = command(GameState::GameWaitingUserMove, Command::Exit, &mut s);
        assert_eq!(t.state, GameState::GameExit);
        assert!(t.effects.is_empty());
        let t = command(GameState::GameExit, Command::Exit, &mut s);
        assert_eq!(t.state, GameState::Home);
        assert!(t.effects.contains(&Effect::StopEngines));
        assert!(!s.show_analysis);
    }

    #[test]
    fn test_checkmate_ends_the_game() {
        let mut s = session();
        s.human_game = true;
        s.board = played(&["f2f3", "e7e5", "g2g4", "d8h4"]);
        let t = tick(GameState::GameWaitingUserMove, None, &mut s);
        assert_eq!(t.state, GameState::GameOver);
        assert_eq!(s.result.as_deref(), Some("0-1 (black wins by checkmate)"));
        let t = tick(GameState::GameOver, None, &mut s);
        assert_eq!(t.state, GameState::GameOver);
    }

    #[test]
    fn test_force_move_only_while_engine_thinks() {
        let mut s = session();
        let t = command(GameState::GameWaitingAiMove, Command::ForceMove, &mut s);
        assert_eq!(t.effects, vec![Effect::ForceEngineMove]);
        let t = command(GameState::GameWaitingUserMove, Command::ForceMove, &mut s);
        assert!(t.effects.is_empty());
        s.is_rom = true;
        let t = command(GameState::GameWaitingAiMove, Command::ForceMove, &mut s);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_resume_saved_game_flow() {
        let mut s = session();
        s.saved_games = vec!["game_1".to_string()];
        let t = command(GameState::Home, Command::ResumeGame, &mut s);
        assert_eq!(t.state, GameState::ResumeGame);
        let t = command(GameState::ResumeGame, Command::ResumeGame, &mut s);
        assert_eq!(t.state, GameState::NewGame);
        assert!(t.effects.contains(&Effect::LoadSavedGame {
            name: "game_1".to_string()
        }));
        assert!(s.resuming);
        s.board = played(&["d2d4"]);
        command(GameState::NewGame, Command::Start, &mut s);
        assert_eq!(s.board.ply(), 1);
        assert!(!s.resuming);
    }
}
