//! In-memory engine speaking the engine line protocol over channels.
//!
//! Used by the test suites: replies are produced by a responder closure and
//! can be supplemented by hand through the paired [`EngineScript`].

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::process::{EngineChannel, EngineFactory, Launcher};
use crate::error::{EngineError, EngineResult};
use crate::game::board::VirtualBoard;
use crate::models::{lock_or_recover, EngineConfig};

/// Produces the engine's replies to one command line
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

pub struct ScriptedEngine {
    sent: Sender<String>,
    replies: Sender<String>,
    lines: Receiver<String>,
    responder: Responder,
}

/// Test-side handle: sees every command and can emit extra lines
pub struct EngineScript {
    pub sent: Receiver<String>,
    replies: Sender<String>,
}

pub fn scripted_engine(responder: Responder) -> (ScriptedEngine, EngineScript) {
    let (sent_tx, sent_rx) = unbounded();
    let (reply_tx, reply_rx) = unbounded();
    (
        ScriptedEngine {
            sent: sent_tx,
            replies: reply_tx.clone(),
            lines: reply_rx,
            responder,
        },
        EngineScript {
            sent: sent_rx,
            replies: reply_tx,
        },
    )
}

impl EngineChannel for ScriptedEngine {
    fn send(&mut self, line: &str) -> EngineResult<()> {
        let _ = self.sent.send(line.to_string());
        for reply in (self.responder)(line) {
            self.replies
                .send(reply)
                .map_err(|_| EngineError::Disconnected)?;
        }
        Ok(())
    }

    fn lines(&self) -> &Receiver<String> {
        &self.lines
    }

    fn close(&mut self) {
        let _ = self.sent.send("quit".to_string());
    }
}

impl EngineScript {
    pub fn emit(&self, line: &str) {
        let _ = self.replies.send(line.to_string());
    }

    /// Waits for the next command starting with `prefix`, skipping others
    pub fn expect(&self, prefix: &str, timeout: Duration) -> Option<String> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            let line = self.sent.recv_timeout(left).ok()?;
            if line.starts_with(prefix) {
                return Some(line);
            }
        }
    }
}

/// Answers the handshake and nothing else; searches are driven by hand
pub fn handshake_only() -> Responder {
    Box::new(|line| match line {
        "uci" => vec![
            "id name Scripted".to_string(),
            "option name Threads type spin default 1 min 1 max 8".to_string(),
            "option name MultiPV type spin default 1 min 1 max 5".to_string(),
            "option name Ponder type check default false".to_string(),
            "uciok".to_string(),
        ],
        "isready" => vec!["readyok".to_string()],
        _ => Vec::new(),
    })
}

/// Answers every search at once with the first legal move of the position
pub fn playing() -> Responder {
    let mut handshake = handshake_only();
    let mut position: Option<VirtualBoard> = None;
    Box::new(move |line| {
        if let Some(rest) = line.strip_prefix("position fen ") {
            position = parse_position(rest);
            return Vec::new();
        }
        if line.starts_with("go") {
            let mv = position
                .as_ref()
                .and_then(|board| board.legal_moves().first().copied())
                .map(|m| m.to_string());
            return match mv {
                Some(mv) => vec![
                    format!("info depth 1 multipv 1 score cp 12 pv {}", mv),
                    format!("bestmove {}", mv),
                ],
                None => vec!["bestmove (none)".to_string()],
            };
        }
        handshake(line)
    })
}

fn parse_position(rest: &str) -> Option<VirtualBoard> {
    let (fen, moves) = match rest.split_once(" moves ") {
        Some((fen, moves)) => (fen, moves),
        None => (rest, ""),
    };
    let mut board = VirtualBoard::from_fen(fen).ok()?;
    for mv in moves.split_whitespace() {
        board.push_uci(mv)?;
    }
    Some(board)
}

/// Factory handing out scripted engines and keeping their scripts
pub struct ScriptedFactory {
    make: fn() -> Responder,
    scripts: Arc<Mutex<Vec<(String, EngineScript)>>>,
}

impl ScriptedFactory {
    pub fn new(make: fn() -> Responder) -> Self {
        ScriptedFactory {
            make,
            scripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared list of (engine name, script) in launch order
    pub fn scripts(&self) -> Arc<Mutex<Vec<(String, EngineScript)>>> {
        Arc::clone(&self.scripts)
    }
}

impl EngineFactory for ScriptedFactory {
    fn launcher(&self, config: &EngineConfig) -> Launcher {
        let (engine, script) = scripted_engine((self.make)());
        lock_or_recover(&self.scripts).push((config.engine.clone(), script));
        Box::new(move || Ok(Box::new(engine) as Box<dyn EngineChannel>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playing_responder_answers_with_a_legal_move() {
        let mut responder = playing();
        assert!(responder("uci").contains(&"uciok".to_string()));
        responder("position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 moves e2e4");
        let replies = responder("go depth 3");
        assert_eq!(replies.last().map(String::as_str), Some("bestmove a7a5"));
    }
}
