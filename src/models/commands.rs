use serde::{Deserialize, Serialize};
use std::fmt;

/// Time control presets offered on the new game menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeControl {
    Unlimited,
    Blitz,
    Rapid,
    Classical,
    Custom,
}

impl TimeControl {
    /// Minutes and increment seconds, `None` for an unlimited game
    pub fn preset(self, custom_minutes: u32, custom_increment: u32) -> Option<(u32, u32)> {
        match self {
            TimeControl::Unlimited => None,
            TimeControl::Blitz => Some((5, 0)),
            TimeControl::Rapid => Some((10, 5)),
            TimeControl::Classical => Some((30, 20)),
            TimeControl::Custom => Some((custom_minutes, custom_increment)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeControl::Unlimited => "unlimited",
            TimeControl::Blitz => "blitz",
            TimeControl::Rapid => "rapid",
            TimeControl::Classical => "classical",
            TimeControl::Custom => "custom",
        }
    }
}

/// Which side moves first when the game starts from the physical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn to_color(self) -> chess::Color {
        match self {
            Side::White => chess::Color::White,
            Side::Black => chess::Color::Black,
        }
    }

    pub fn flipped(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// A single tracked mutation of the session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum SettingChange {
    PlayWhite(bool),
    Rotate180(bool),
    HumanGame(bool),
    UseBoardPosition(bool),
    SideToMove(Side),
    TimeControl(TimeControl),
    TimeTotalMinutes(u32),
    TimeIncrementSeconds(u32),
    Book(String),
    EngineName(String),
    EngineDepth(u8),
    EngineWeights(Option<String>),
    AnalysisEngineName(String),
    ThinkingLeds(String),
    RemoteControl(bool),
    SaveName(String),
    SavedGameIndex(usize),
}

impl SettingChange {
    pub fn key(&self) -> &'static str {
        match self {
            SettingChange::PlayWhite(_) => "play_white",
            SettingChange::Rotate180(_) => "rotate180",
            SettingChange::HumanGame(_) => "human_game",
            SettingChange::UseBoardPosition(_) => "use_board_position",
            SettingChange::SideToMove(_) => "side_to_move",
            SettingChange::TimeControl(_) => "time_mode",
            SettingChange::TimeTotalMinutes(_) => "time_total_minutes",
            SettingChange::TimeIncrementSeconds(_) => "time_increment_seconds",
            SettingChange::Book(_) => "book",
            SettingChange::EngineName(_) => "game_engine.engine",
            SettingChange::EngineDepth(_) => "game_engine.depth",
            SettingChange::EngineWeights(_) => "game_engine.weights",
            SettingChange::AnalysisEngineName(_) => "analysis_engine.engine",
            SettingChange::ThinkingLeds(_) => "led.thinking",
            SettingChange::RemoteControl(_) => "remote_control",
            SettingChange::SaveName(_) => "name_to_save",
            SettingChange::SavedGameIndex(_) => "saved_game_index",
        }
    }
}

/// A discrete user command, whatever produced it (display, keyboard or the
/// physical-board decoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    NewGame,
    ResumeGame,
    Calibration,
    CalibrationRemote,
    Options,
    Setup,
    NewSetup,
    Done,
    Back,
    DeleteGame,
    Confirm,
    Save,
    Hint,
    Analysis,
    ExtendedAnalysis,
    ExtendedHint,
    Exit,
    TakeBack,
    ForceMove,
    Start,
    HumanGame,
    ComputerGame,
    FlipBoard,
    UseBoardPosition,
    SideToMove,
    Time(TimeControl),
    DepthLess,
    DepthMore,
    SelectEngine,
    SelectBook,
    Avatar,
    /// Both the `white` and `black` tokens swap the human's colour
    SwapColor,
    AdjustMinutes(i32),
    AdjustSeconds(i32),
    Configure(Vec<SettingChange>),
}

impl Command {
    /// Parses a plain action token as sent by a display client
    pub fn from_token(token: &str) -> Option<Command> {
        let command = match token {
            "new_game" => Command::NewGame,
            "resume_game" => Command::ResumeGame,
            "calibration" => Command::Calibration,
            "calibration_remote" => Command::CalibrationRemote,
            "options" => Command::Options,
            "setup" => Command::Setup,
            "new-setup" => Command::NewSetup,
            "done" => Command::Done,
            "back" => Command::Back,
            "delete-game" => Command::DeleteGame,
            "confirm" => Command::Confirm,
            "save" => Command::Save,
            "hint" => Command::Hint,
            "analysis" => Command::Analysis,
            "extended_analysis" => Command::ExtendedAnalysis,
            "extended_hint" => Command::ExtendedHint,
            "exit" => Command::Exit,
            "take_back" => Command::TakeBack,
            "force-move" => Command::ForceMove,
            "start" => Command::Start,
            "human_game" => Command::HumanGame,
            "computer_game" => Command::ComputerGame,
            "flip_board" => Command::FlipBoard,
            "use_board_position" => Command::UseBoardPosition,
            "side_to_move" => Command::SideToMove,
            "time_unlimited" => Command::Time(TimeControl::Unlimited),
            "time_blitz" => Command::Time(TimeControl::Blitz),
            "time_rapid" => Command::Time(TimeControl::Rapid),
            "time_classical" => Command::Time(TimeControl::Classical),
            "time_custom" => Command::Time(TimeControl::Custom),
            "depth_less" => Command::DepthLess,
            "depth_more" => Command::DepthMore,
            "select_engine" => Command::SelectEngine,
            "select_book" => Command::SelectBook,
            "avatar" => Command::Avatar,
            "white" | "black" => Command::SwapColor,
            "minutes_less" => Command::AdjustMinutes(-1),
            "minutes_less2" => Command::AdjustMinutes(-10),
            "minutes_more" => Command::AdjustMinutes(1),
            "minutes_more2" => Command::AdjustMinutes(10),
            "seconds_less" => Command::AdjustSeconds(-1),
            "seconds_less2" => Command::AdjustSeconds(-10),
            "seconds_more" => Command::AdjustSeconds(1),
            "seconds_more2" => Command::AdjustSeconds(10),
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Time(tc) => write!(f, "time_{}", tc.name()),
            Command::AdjustMinutes(delta) => write!(f, "minutes{:+}", delta),
            Command::AdjustSeconds(delta) => write!(f, "seconds{:+}", delta),
            Command::Configure(changes) => {
                let keys: Vec<_> = changes.iter().map(|c| c.key()).collect();
                write!(f, "configure[{}]", keys.join(","))
            }
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(Command::from_token("new_game"), Some(Command::NewGame));
        assert_eq!(Command::from_token("force-move"), Some(Command::ForceMove));
        assert_eq!(Command::from_token("black"), Some(Command::SwapColor));
        assert_eq!(
            Command::from_token("minutes_less2"),
            Some(Command::AdjustMinutes(-10))
        );
        assert_eq!(
            Command::from_token("time_rapid"),
            Some(Command::Time(TimeControl::Rapid))
        );
        assert_eq!(Command::from_token("fly"), None);
    }

    #[test]
    fn test_presets() {
        assert_eq!(TimeControl::Blitz.preset(1, 1), Some((5, 0)));
        assert_eq!(TimeControl::Custom.preset(7, 3), Some((7, 3)));
        assert_eq!(TimeControl::Unlimited.preset(7, 3), None);
    }

    #[test]
    fn test_setting_change_json() {
        let change: SettingChange =
            serde_json::from_str(r#"{"key":"engine_depth","value":4}"#).unwrap();
        assert_eq!(change, SettingChange::EngineDepth(4));
    }
}
