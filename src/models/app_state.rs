use actix::Addr;
use crossbeam_channel::Sender;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{ClientMessage, ServerMessage, SocketText};
use crate::websocket::{BoardEvent, BoardSocket, DisplaySocket};

/// Recovers the guard of a poisoned mutex; the protected maps stay usable.
pub fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Application state shared between connections and the tick loop
pub struct AppState {
    pub displays: Mutex<HashMap<String, Addr<DisplaySocket>>>,
    pub boards: Mutex<HashMap<String, Addr<BoardSocket>>>,
    /// Display input forwarded to the tick loop
    pub actions: Sender<ClientMessage>,
    /// Board readings forwarded to the tick loop
    pub board_events: Sender<BoardEvent>,
}

impl AppState {
    pub fn new(actions: Sender<ClientMessage>, board_events: Sender<BoardEvent>) -> Self {
        AppState {
            displays: Mutex::new(HashMap::new()),
            boards: Mutex::new(HashMap::new()),
            actions,
            board_events,
        }
    }

    fn encode(message: &ServerMessage) -> Option<String> {
        match serde_json::to_string(message) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Could not serialize {} message: {}", message.message_type, e);
                None
            }
        }
    }

    pub fn broadcast_displays(&self, message: &ServerMessage) {
        let Some(text) = Self::encode(message) else {
            return;
        };
        let displays = lock_or_recover(&self.displays);
        debug!(
            "Broadcasting {} to {} displays",
            message.message_type,
            displays.len()
        );
        for addr in displays.values() {
            addr.do_send(SocketText(text.clone()));
        }
    }

    pub fn broadcast_boards(&self, message: &ServerMessage) {
        let Some(text) = Self::encode(message) else {
            return;
        };
        for addr in lock_or_recover(&self.boards).values() {
            addr.do_send(SocketText(text.clone()));
        }
    }

    pub fn connected_boards(&self) -> usize {
        lock_or_recover(&self.boards).len()
    }
}
