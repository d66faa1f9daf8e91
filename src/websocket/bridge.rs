//! Adapters between the tick loop and the connected sockets.

use actix_web::web;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::collections::VecDeque;

use crate::controller::{Frame, Presentation};
use crate::error::SensorError;
use crate::models::{
    lock_or_recover, AppState, CalibrationMode, ClientMessage, Command, GameState, LedCommand,
    QuitReason, ServerMessage, Session, Snapshot,
};
use crate::sensor::{BoardSensor, LedActuator, Reading};
use crate::websocket::board::BoardEvent;

/// Board sensor fed by whatever board transport is connected on `/board`
pub struct RemoteBoard {
    events: Receiver<BoardEvent>,
    app_state: web::Data<AppState>,
    latest: Option<Reading>,
    calibrating: Option<CalibrationMode>,
    calibrated: bool,
}

impl RemoteBoard {
    pub fn new(events: Receiver<BoardEvent>, app_state: web::Data<AppState>) -> Self {
        RemoteBoard {
            events,
            app_state,
            latest: None,
            calibrating: None,
            calibrated: false,
        }
    }

    fn drain(&mut self) {
        for event in self.events.try_iter() {
            match event {
                BoardEvent::Reading(reading) => self.latest = Some(reading),
                BoardEvent::CalibrationDone => self.calibrated = true,
                BoardEvent::Connected(id) => debug!("Board {} is available", id),
                BoardEvent::Disconnected(id) => {
                    debug!("Board {} went away", id);
                    if self.app_state.connected_boards() == 0 {
                        self.latest = None;
                    }
                }
            }
        }
    }
}

impl BoardSensor for RemoteBoard {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.drain();
        if self.app_state.connected_boards() == 0 {
            return Err(SensorError::Disconnected);
        }
        self.latest.clone().ok_or(SensorError::Disconnected)
    }

    fn calibrate(&mut self, mode: CalibrationMode, verbose: bool) -> Result<bool, SensorError> {
        self.drain();
        if self.app_state.connected_boards() == 0 {
            return Err(SensorError::Disconnected);
        }
        if self.calibrating != Some(mode) {
            if verbose {
                info!("Starting {:?} calibration", mode);
            }
            self.calibrating = Some(mode);
            self.calibrated = false;
            self.app_state.broadcast_boards(&ServerMessage::calibrate(mode));
            return Ok(false);
        }
        if self.calibrated {
            self.calibrating = None;
            self.calibrated = false;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Sends LED commands to every connected board and mirrors them on displays
pub struct HubLeds {
    app_state: web::Data<AppState>,
}

impl HubLeds {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        HubLeds { app_state }
    }
}

impl LedActuator for HubLeds {
    fn apply(&mut self, command: &LedCommand) {
        let message = ServerMessage::leds(command.clone());
        self.app_state.broadcast_boards(&message);
        self.app_state.broadcast_displays(&message);
    }
}

/// Pushes snapshots to displays and turns their messages into commands
pub struct WebPresentation {
    actions: Receiver<ClientMessage>,
    app_state: web::Data<AppState>,
    pending: VecDeque<Command>,
    last: Option<Snapshot>,
    displays: usize,
}

impl WebPresentation {
    pub fn new(actions: Receiver<ClientMessage>, app_state: web::Data<AppState>) -> Self {
        WebPresentation {
            actions,
            app_state,
            pending: VecDeque::new(),
            last: None,
            displays: 0,
        }
    }

    /// Queues the commands in a message; returns a quit request if there is one
    fn accept(&mut self, msg: ClientMessage) -> Option<QuitReason> {
        if let Some(changes) = msg.changes {
            if !changes.is_empty() {
                self.pending.push_back(Command::Configure(changes));
            }
        }
        if let Some(token) = msg.action {
            match Command::from_token(&token) {
                Some(command) => self.pending.push_back(command),
                None => {
                    warn!("Unknown action: {}", token);
                    self.app_state
                        .broadcast_displays(&ServerMessage::error(format!("Unknown action: {}", token)));
                }
            }
        }
        msg.quit
    }
}

impl Presentation for WebPresentation {
    fn render(&mut self, state: GameState, session: &Session) -> Frame {
        let snapshot = Snapshot::capture(state, session);
        let displays = lock_or_recover(&self.app_state.displays).len();
        // New displays get the current screen even when nothing changed
        if self.last.as_ref() != Some(&snapshot) || displays > self.displays {
            self.app_state
                .broadcast_displays(&ServerMessage::snapshot(snapshot.clone()));
            self.last = Some(snapshot);
        }
        self.displays = displays;

        let mut frame = Frame::default();
        while let Ok(msg) = self.actions.try_recv() {
            if let Some(reason) = self.accept(msg) {
                frame.quit = Some(reason);
                return frame;
            }
        }
        frame.action = self.pending.pop_front();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoardSettings, GameSettings, SettingChange};
    use crossbeam_channel::unbounded;

    fn app_state() -> web::Data<AppState> {
        let (actions, _) = unbounded();
        let (board_events, _) = unbounded();
        web::Data::new(AppState::new(actions, board_events))
    }

    fn session() -> Session {
        Session::new(GameSettings::default(), BoardSettings::default())
    }

    #[test]
    fn test_display_messages_become_commands_one_per_frame() {
        let (tx, rx) = unbounded();
        let mut presentation = WebPresentation::new(rx, app_state());
        tx.send(ClientMessage {
            action: Some("new_game".to_string()),
            changes: Some(vec![SettingChange::EngineDepth(3)]),
            quit: None,
        })
        .unwrap();
        let s = session();
        assert_eq!(
            presentation.render(GameState::Home, &s).action,
            Some(Command::Configure(vec![SettingChange::EngineDepth(3)]))
        );
        assert_eq!(presentation.render(GameState::Home, &s).action, Some(Command::NewGame));
        assert_eq!(presentation.render(GameState::Home, &s), Frame::default());
    }

    #[test]
    fn test_quit_and_unknown_actions() {
        let (tx, rx) = unbounded();
        let mut presentation = WebPresentation::new(rx, app_state());
        tx.send(ClientMessage {
            action: Some("fly".to_string()),
            changes: None,
            quit: None,
        })
        .unwrap();
        tx.send(ClientMessage {
            action: None,
            changes: None,
            quit: Some(QuitReason::Window),
        })
        .unwrap();
        let frame = presentation.render(GameState::Home, &session());
        assert_eq!(frame.quit, Some(QuitReason::Window));
        assert_eq!(frame.action, None);
    }

    #[test]
    fn test_remote_board_without_connection() {
        let (_tx, rx) = unbounded();
        let mut board = RemoteBoard::new(rx, app_state());
        assert!(matches!(board.read(), Err(SensorError::Disconnected)));
        assert!(matches!(
            board.calibrate(CalibrationMode::Full, false),
            Err(SensorError::Disconnected)
        ));
    }
}
