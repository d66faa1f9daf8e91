use actix::Message;
use serde::{Deserialize, Serialize};

use crate::models::{
    AnalysisDisplay, CalibrationMode, GameState, LedCommand, QuitReason, Session, SettingChange,
};

/// Message sent from a display client to the server
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessage {
    /// Action token such as `new_game` or `take_back`
    pub action: Option<String>,
    /// Structured setting changes, sent with or without an action
    pub changes: Option<Vec<SettingChange>>,
    pub quit: Option<QuitReason>,
}

/// Message sent by the board transport process
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BoardMessage {
    pub message_type: String,
    pub layout: Option<String>,
    pub layout_missing: Option<String>,
    pub needs_calibration: Option<bool>,
}

/// Message sent from server to clients
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerMessage {
    pub message_type: String,
    pub snapshot: Option<Snapshot>,
    pub leds: Option<LedCommand>,
    pub calibrate: Option<CalibrationMode>,
    pub error: Option<String>,
}

impl ServerMessage {
    fn empty(message_type: &str) -> Self {
        ServerMessage {
            message_type: message_type.to_string(),
            snapshot: None,
            leds: None,
            calibrate: None,
            error: None,
        }
    }

    pub fn snapshot(snapshot: Snapshot) -> Self {
        ServerMessage {
            snapshot: Some(snapshot),
            ..ServerMessage::empty("snapshot")
        }
    }

    pub fn leds(leds: LedCommand) -> Self {
        ServerMessage {
            leds: Some(leds),
            ..ServerMessage::empty("leds")
        }
    }

    pub fn calibrate(mode: CalibrationMode) -> Self {
        ServerMessage {
            calibrate: Some(mode),
            ..ServerMessage::empty("calibrate")
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage {
            error: Some(error.into()),
            ..ServerMessage::empty("error")
        }
    }
}

/// What a display needs to draw the current screen
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: GameState,
    pub fen: String,
    pub moves: Vec<String>,
    pub play_white: bool,
    pub human_game: bool,
    pub rotate180: bool,
    pub time_mode: String,
    pub white_time_ms: Option<u64>,
    pub black_time_ms: Option<u64>,
    pub engine: String,
    pub depth: u8,
    pub book: String,
    pub result: Option<String>,
    pub banner: Option<String>,
    pub terminal: Vec<String>,
    pub score: Option<String>,
    pub hint: Option<String>,
    pub analysis: Vec<(usize, Option<String>, String)>,
    pub engines: Vec<String>,
    pub books: Vec<String>,
    pub saved_games: Vec<String>,
}

impl Snapshot {
    pub fn capture(state: GameState, session: &Session) -> Self {
        let AnalysisDisplay {
            score,
            hint,
            history,
            ..
        } = session.display.clone();
        Snapshot {
            state,
            fen: session.board.fen(),
            moves: session.board.uci_moves(),
            play_white: session.play_white,
            human_game: session.human_game,
            rotate180: session.rotate180,
            time_mode: session.time_control.name().to_string(),
            white_time_ms: session.clock.remaining_ms(chess::Color::White),
            black_time_ms: session.clock.remaining_ms(chess::Color::Black),
            engine: session.game_settings.game_engine.engine.clone(),
            depth: session.game_settings.game_engine.depth,
            book: session.book.clone(),
            result: session.result.clone(),
            banner: session.banner.clone(),
            terminal: session.terminal.clone(),
            score: if session.show_analysis || session.show_extended_analysis {
                score
            } else {
                None
            },
            hint: if session.show_hint || session.show_extended_hint {
                hint
            } else {
                None
            },
            analysis: if session.show_extended_analysis {
                history
            } else {
                Vec::new()
            },
            engines: session.catalog.engines.clone(),
            books: session.catalog.books.clone(),
            saved_games: session.saved_games.clone(),
        }
    }
}

/// Message type for WebSocket communication
#[derive(Message)]
#[rtype(result = "()")]
pub struct SocketText(pub String);
