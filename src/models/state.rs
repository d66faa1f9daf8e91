use serde::{Deserialize, Serialize};
use std::fmt;

/// The single authoritative control-flow token of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Init,
    StartupLeds,
    Home,
    CalibrationMenu,
    Calibration,
    CalibrationPartial,
    CalibrationReturnHome,
    ResumeGame,
    DeleteGame,
    Options,
    NewGame,
    SelectTime,
    SelectEngine,
    SelectWeights,
    SelectBook,
    Save,
    GameResume,
    GameWaitingUserMove,
    GameDoUserMove,
    GameRequestAiMove,
    GameWaitingAiMove,
    GameDoAiMove,
    GameDoTakeBack,
    GamePiecesWrongPlaceAiMove,
    GamePiecesWrongPlaceResume,
    GamePiecesWrongPlaceInvalidPosition,
    GamePiecesWrongPlaceTakeBack,
    GameExit,
    GameOver,
}

impl GameState {
    pub const ALL: [GameState; 29] = [
        GameState::Init,
        GameState::StartupLeds,
        GameState::Home,
        GameState::CalibrationMenu,
        GameState::Calibration,
        GameState::CalibrationPartial,
        GameState::CalibrationReturnHome,
        GameState::ResumeGame,
        GameState::DeleteGame,
        GameState::Options,
        GameState::NewGame,
        GameState::SelectTime,
        GameState::SelectEngine,
        GameState::SelectWeights,
        GameState::SelectBook,
        GameState::Save,
        GameState::GameResume,
        GameState::GameWaitingUserMove,
        GameState::GameDoUserMove,
        GameState::GameRequestAiMove,
        GameState::GameWaitingAiMove,
        GameState::GameDoAiMove,
        GameState::GameDoTakeBack,
        GameState::GamePiecesWrongPlaceAiMove,
        GameState::GamePiecesWrongPlaceResume,
        GameState::GamePiecesWrongPlaceInvalidPosition,
        GameState::GamePiecesWrongPlaceTakeBack,
        GameState::GameExit,
        GameState::GameOver,
    ];

    /// True while a game is being played, reviewed or finished
    pub fn is_game(self) -> bool {
        matches!(
            self,
            GameState::GameResume
                | GameState::GameWaitingUserMove
                | GameState::GameDoUserMove
                | GameState::GameRequestAiMove
                | GameState::GameWaitingAiMove
                | GameState::GameDoAiMove
                | GameState::GameDoTakeBack
                | GameState::GamePiecesWrongPlaceAiMove
                | GameState::GamePiecesWrongPlaceResume
                | GameState::GamePiecesWrongPlaceInvalidPosition
                | GameState::GamePiecesWrongPlaceTakeBack
                | GameState::GameExit
                | GameState::GameOver
        )
    }

    /// States in which running engines survive; leaving them stops every engine.
    pub fn keeps_engines(self) -> bool {
        self.is_game() || self == GameState::Save
    }

    pub fn is_calibration(self) -> bool {
        matches!(
            self,
            GameState::Calibration
                | GameState::CalibrationPartial
                | GameState::CalibrationReturnHome
        )
    }

    /// States waiting for the physical pieces to match the virtual board
    pub fn is_wrong_place(self) -> bool {
        matches!(
            self,
            GameState::GamePiecesWrongPlaceAiMove
                | GameState::GamePiecesWrongPlaceResume
                | GameState::GamePiecesWrongPlaceInvalidPosition
                | GameState::GamePiecesWrongPlaceTakeBack
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            GameState::Init => "init",
            GameState::StartupLeds => "startup_leds",
            GameState::Home => "home",
            GameState::CalibrationMenu => "calibration_menu",
            GameState::Calibration => "calibration",
            GameState::CalibrationPartial => "calibration_partial",
            GameState::CalibrationReturnHome => "calibration_return_home",
            GameState::ResumeGame => "resume_game",
            GameState::DeleteGame => "delete_game",
            GameState::Options => "options",
            GameState::NewGame => "new_game",
            GameState::SelectTime => "select_time",
            GameState::SelectEngine => "select_engine",
            GameState::SelectWeights => "select_weights",
            GameState::SelectBook => "select_book",
            GameState::Save => "save",
            GameState::GameResume => "game_resume",
            GameState::GameWaitingUserMove => "game_waiting_user_move",
            GameState::GameDoUserMove => "game_do_user_move",
            GameState::GameRequestAiMove => "game_request_ai_move",
            GameState::GameWaitingAiMove => "game_waiting_ai_move",
            GameState::GameDoAiMove => "game_do_ai_move",
            GameState::GameDoTakeBack => "game_do_take_back",
            GameState::GamePiecesWrongPlaceAiMove => "game_pieces_wrong_place_ai_move",
            GameState::GamePiecesWrongPlaceResume => "game_pieces_wrong_place_resume",
            GameState::GamePiecesWrongPlaceInvalidPosition => {
                "game_pieces_wrong_place_invalid_position"
            }
            GameState::GamePiecesWrongPlaceTakeBack => "game_pieces_wrong_place_take_back",
            GameState::GameExit => "game_exit",
            GameState::GameOver => "game_over",
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = GameState::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), GameState::ALL.len());
    }

    #[test]
    fn test_metadata_groups() {
        assert!(GameState::GameOver.is_game());
        assert!(!GameState::Save.is_game());
        assert!(GameState::Save.keeps_engines());
        assert!(!GameState::NewGame.keeps_engines());
        for state in GameState::ALL {
            if state.is_wrong_place() {
                assert!(state.is_game());
            }
            assert!(!(state.is_calibration() && state.is_game()));
        }
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&GameState::GameWaitingAiMove).unwrap();
        assert_eq!(json, "\"game_waiting_ai_move\"");
    }
}
