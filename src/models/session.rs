use chess::{ChessMove, Color};
use log::info;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::game::board::VirtualBoard;
use crate::game::book::OpeningBook;
use crate::game::clock::GameClock;
use crate::models::{BoardSettings, GameSettings, SettingChange, Side, TimeControl};
use crate::sensor::Reading;

const TERMINAL_LINES: usize = 200;

/// Deadlines owned by the state machine
#[derive(Debug, Clone, Default)]
pub struct Timers {
    pub startup_until: Option<Instant>,
    /// Earliest moment an engine move may be played
    pub ai_min_until: Option<Instant>,
    /// Caller-side budget for the engine; re-armed when it expires
    pub ai_budget_until: Option<Instant>,
    /// First tick at which the physical board stopped matching
    pub mismatch_since: Option<Instant>,
    /// When a failed game engine is asked for the move again
    pub engine_retry_at: Option<Instant>,
}

/// Engine output copied into the session for the presentation layer
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AnalysisDisplay {
    pub score: Option<String>,
    pub hint: Option<String>,
    /// (ply, move, formatted score) for the extended analysis view
    pub history: Vec<(usize, Option<String>, String)>,
    pub extended_complete: bool,
}

/// Everything a transition may read or change besides the state token.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub board: VirtualBoard,
    pub reading: Option<Reading>,
    pub human_game: bool,
    pub play_white: bool,
    pub rotate180: bool,
    pub use_board_position: bool,
    pub side_to_move: Side,
    pub time_control: TimeControl,
    pub time_total_minutes: u32,
    pub time_increment_seconds: u32,
    pub book: String,
    pub game_settings: GameSettings,
    pub board_settings: BoardSettings,
    pub is_rom: bool,
    pub show_hint: bool,
    pub show_extended_hint: bool,
    pub show_analysis: bool,
    pub show_extended_analysis: bool,
    pub hint_root_moves: Option<Vec<String>>,
    pub hint_bestmove: Option<String>,
    pub clock: GameClock,
    pub opening_book: Option<Arc<OpeningBook>>,
    pub depleted_book: bool,
    pub ai_move: Option<String>,
    pub pending_moves: Vec<ChessMove>,
    /// Plies to undo on the next take-back; 0 undoes back to the human's turn
    pub take_back_plies: usize,
    pub reissue_bestmove: bool,
    pub resuming: bool,
    pub name_to_save: String,
    pub saved_games: Vec<String>,
    pub saved_game_index: usize,
    pub catalog: Catalog,
    pub terminal: Vec<String>,
    pub banner: Option<String>,
    pub result: Option<String>,
    pub display: AnalysisDisplay,
    pub max_depth: u8,
    pub strict: bool,
    pub timers: Timers,
    changed: Vec<SettingChange>,
}

impl Session {
    pub fn new(game_settings: GameSettings, board_settings: BoardSettings) -> Self {
        Session {
            id: Uuid::new_v4(),
            board: VirtualBoard::new(),
            reading: None,
            human_game: false,
            play_white: true,
            rotate180: false,
            use_board_position: false,
            side_to_move: Side::White,
            time_control: TimeControl::Unlimited,
            time_total_minutes: 5,
            time_increment_seconds: 3,
            book: String::new(),
            game_settings,
            board_settings,
            is_rom: false,
            show_hint: false,
            show_extended_hint: false,
            show_analysis: false,
            show_extended_analysis: false,
            hint_root_moves: None,
            hint_bestmove: None,
            clock: GameClock::default(),
            opening_book: None,
            depleted_book: false,
            ai_move: None,
            pending_moves: Vec::new(),
            take_back_plies: 0,
            reissue_bestmove: false,
            resuming: false,
            name_to_save: String::new(),
            saved_games: Vec::new(),
            saved_game_index: 0,
            catalog: Catalog::default(),
            terminal: Vec::new(),
            banner: None,
            result: None,
            display: AnalysisDisplay::default(),
            max_depth: 20,
            strict: false,
            timers: Timers::default(),
            changed: Vec::new(),
        }
    }

    pub fn human_color(&self) -> Color {
        if self.play_white {
            Color::White
        } else {
            Color::Black
        }
    }

    /// True when the engine is on move in a computer game
    pub fn is_engine_turn(&self) -> bool {
        !self.human_game && self.board.side_to_move() != self.human_color()
    }

    pub fn terminal_print(&mut self, line: impl Into<String>) {
        self.terminal.push(line.into());
        if self.terminal.len() > TERMINAL_LINES {
            let excess = self.terminal.len() - TERMINAL_LINES;
            self.terminal.drain(..excess);
        }
    }

    /// Hides the one-shot hint and analysis after the position changed
    pub fn hide_transient_views(&mut self) {
        if !self.show_extended_hint {
            self.show_hint = false;
            self.hint_bestmove = None;
        }
        if !self.show_extended_analysis {
            self.show_analysis = false;
        }
    }

    pub fn clear_view_flags(&mut self) {
        self.show_hint = false;
        self.show_extended_hint = false;
        self.show_analysis = false;
        self.show_extended_analysis = false;
        self.hint_bestmove = None;
        self.display = AnalysisDisplay::default();
    }

    /// Whether applying `change` would alter the session
    pub fn would_change(&self, change: &SettingChange) -> bool {
        match change {
            SettingChange::PlayWhite(v) => self.play_white != *v,
            SettingChange::Rotate180(v) => self.rotate180 != *v,
            SettingChange::HumanGame(v) => self.human_game != *v,
            SettingChange::UseBoardPosition(v) => self.use_board_position != *v,
            SettingChange::SideToMove(v) => self.side_to_move != *v,
            SettingChange::TimeControl(v) => self.time_control != *v,
            SettingChange::TimeTotalMinutes(v) => self.time_total_minutes != *v,
            SettingChange::TimeIncrementSeconds(v) => self.time_increment_seconds != *v,
            SettingChange::Book(v) => &self.book != v,
            SettingChange::EngineName(v) => &self.game_settings.game_engine.engine != v,
            SettingChange::EngineDepth(v) => self.game_settings.game_engine.depth != *v,
            SettingChange::EngineWeights(v) => &self.game_settings.game_engine.weights != v,
            SettingChange::AnalysisEngineName(v) => {
                &self.game_settings.analysis_engine.engine != v
            }
            SettingChange::ThinkingLeds(v) => &self.game_settings.led.thinking != v,
            SettingChange::RemoteControl(v) => self.board_settings.remote_control != *v,
            SettingChange::SaveName(v) => &self.name_to_save != v,
            SettingChange::SavedGameIndex(v) => self.saved_game_index != *v,
        }
    }

    /// The only way settings are mutated; every effective change is logged and tracked
    pub fn change_setting(&mut self, change: SettingChange) -> bool {
        if !self.would_change(&change) {
            return false;
        }
        info!("Changed setting {}: {:?}", change.key(), change);
        match &change {
            SettingChange::PlayWhite(v) => self.play_white = *v,
            SettingChange::Rotate180(v) => self.rotate180 = *v,
            SettingChange::HumanGame(v) => self.human_game = *v,
            SettingChange::UseBoardPosition(v) => self.use_board_position = *v,
            SettingChange::SideToMove(v) => self.side_to_move = *v,
            SettingChange::TimeControl(v) => self.time_control = *v,
            SettingChange::TimeTotalMinutes(v) => self.time_total_minutes = *v,
            SettingChange::TimeIncrementSeconds(v) => self.time_increment_seconds = *v,
            SettingChange::Book(v) => self.book = v.clone(),
            SettingChange::EngineName(v) => self.game_settings.game_engine.engine = v.clone(),
            SettingChange::EngineDepth(v) => self.game_settings.game_engine.depth = *v,
            SettingChange::EngineWeights(v) => self.game_settings.game_engine.weights = v.clone(),
            SettingChange::AnalysisEngineName(v) => {
                self.game_settings.analysis_engine.engine = v.clone()
            }
            SettingChange::ThinkingLeds(v) => self.game_settings.led.thinking = v.clone(),
            SettingChange::RemoteControl(v) => self.board_settings.remote_control = *v,
            SettingChange::SaveName(v) => self.name_to_save = v.clone(),
            SettingChange::SavedGameIndex(v) => self.saved_game_index = *v,
        }
        self.changed.push(change);
        true
    }

    /// Changes applied since the last call
    pub fn take_changes(&mut self) -> Vec<SettingChange> {
        std::mem::take(&mut self.changed)
    }

    pub fn selected_saved_game(&self) -> Option<&String> {
        self.saved_games.get(self.saved_game_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(GameSettings::default(), BoardSettings::default())
    }

    #[test]
    fn test_change_setting_tracks_only_real_changes() {
        let mut s = session();
        assert!(!s.change_setting(SettingChange::PlayWhite(true)));
        assert!(s.change_setting(SettingChange::EngineDepth(9)));
        assert!(s.change_setting(SettingChange::TimeControl(TimeControl::Rapid)));
        assert_eq!(s.game_settings.game_engine.depth, 9);
        assert_eq!(
            s.take_changes(),
            vec![
                SettingChange::EngineDepth(9),
                SettingChange::TimeControl(TimeControl::Rapid)
            ]
        );
        assert!(s.take_changes().is_empty());
    }

    #[test]
    fn test_engine_turn() {
        let mut s = session();
        assert!(!s.is_engine_turn());
        s.play_white = false;
        assert!(s.is_engine_turn());
        s.human_game = true;
        assert!(!s.is_engine_turn());
    }

    #[test]
    fn test_terminal_is_bounded() {
        let mut s = session();
        for i in 0..(TERMINAL_LINES + 5) {
            s.terminal_print(format!("line {}", i));
        }
        assert_eq!(s.terminal.len(), TERMINAL_LINES);
        assert_eq!(s.terminal[0], "line 5");
    }
}
