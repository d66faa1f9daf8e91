//! Error types shared across the driver.

use crate::models::{Command, GameState};

/// Errors raised by an engine worker or its process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine executable could not be launched
    #[error("Failed to start engine {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the engine failed
    #[error("Engine i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The engine did not answer the handshake in time
    #[error("Engine did not answer `{expected}` within {timeout_ms} ms")]
    Handshake { expected: String, timeout_ms: u64 },

    /// The engine closed its output stream
    #[error("Engine process exited")]
    Disconnected,

    /// The engine proposed a move that cannot be played
    #[error("Illegal or unparseable engine move: {0}")]
    IllegalMove(String),
}

/// Errors raised while talking to the board sensor.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// No board is connected (yet)
    #[error("Board is not connected")]
    Disconnected,

    /// The board produced a reading that could not be understood
    #[error("Unreadable board layout: {0}")]
    Unreadable(String),
}

/// Errors raised while loading or saving settings and saved games.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings i/o failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Saved game not found: {0}")]
    MissingGame(String),

    #[error("Saved game {name} is corrupt: {message}")]
    CorruptGame { name: String, message: String },
}

/// Contract violations of the state machine.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// A command arrived that the current state does not accept
    #[error("Command {command:?} is not valid in state {state}")]
    InvalidCommand { state: GameState, command: Command },
}

/// Umbrella error for the controller and the binary.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
