use serde::{Deserialize, Serialize};

/// Lighting pattern understood by the LED actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedPattern {
    All,
    Corners,
    Center,
    Setup,
    Squares(Vec<String>),
}

impl LedPattern {
    pub fn from_name(name: &str) -> LedPattern {
        match name {
            "all" => LedPattern::All,
            "corners" => LedPattern::Corners,
            "setup" => LedPattern::Setup,
            _ => LedPattern::Center,
        }
    }

    pub fn squares<S: ToString>(squares: &[S]) -> LedPattern {
        LedPattern::Squares(squares.iter().map(|s| s.to_string()).collect())
    }

    /// Mirrors explicit squares for a board that is turned around
    pub fn rotated(self) -> LedPattern {
        match self {
            LedPattern::Squares(squares) => {
                LedPattern::Squares(squares.iter().map(|s| rotate_square_name(s)).collect())
            }
            named => named,
        }
    }
}

fn rotate_square_name(name: &str) -> String {
    let bytes = name.as_bytes();
    if bytes.len() != 2 || !(b'a'..=b'h').contains(&bytes[0]) || !(b'1'..=b'8').contains(&bytes[1])
    {
        return name.to_string();
    }
    let file = (b'h' - (bytes[0] - b'a')) as char;
    let rank = (b'8' - (bytes[1] - b'1')) as char;
    format!("{}{}", file, rank)
}

/// Fire-and-forget LED instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedCommand {
    Off,
    Set { pattern: LedPattern },
    Flash { pattern: LedPattern },
    SetAndFlash { set: LedPattern, flash: LedPattern },
}

impl LedCommand {
    pub fn rotated(self) -> LedCommand {
        match self {
            LedCommand::Off => LedCommand::Off,
            LedCommand::Set { pattern } => LedCommand::Set {
                pattern: pattern.rotated(),
            },
            LedCommand::Flash { pattern } => LedCommand::Flash {
                pattern: pattern.rotated(),
            },
            LedCommand::SetAndFlash { set, flash } => LedCommand::SetAndFlash {
                set: set.rotated(),
                flash: flash.rotated(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuitReason {
    Window,
    Key,
    Logo,
    RemoteControl,
    Interrupt,
}

/// Calibration flavours offered by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// Complete calibration with an empty board
    Full,
    /// Re-calibrate only the starting position squares
    Partial,
}

/// Declarative side effect emitted by a transition; the controller applies it.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Leds(LedCommand),
    StopEngines,
    /// Ask the game engine for a move in the current position
    RequestBestmove { reissue: bool },
    ForceEngineMove,
    RequestHint,
    RequestAnalysis,
    /// Drop analysis for plies beyond the given one
    PruneAnalysis { ply: usize },
    LoadBook { name: String },
    PersistSettings,
    PersistBoardSettings,
    RefreshSavedGames,
    RefreshCatalog,
    LoadSavedGame { name: String },
    SaveGame { name: String },
    DeleteSavedGame { name: String },
    Quit(QuitReason),
}
