//! Command line options and the persisted settings documents.

use clap::Parser;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::models::{BoardSettings, GameSettings};

pub const GAME_SETTINGS_FILE: &str = "game_settings.json";
pub const BOARD_SETTINGS_FILE: &str = "board_settings.json";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding settings and saved games
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory with engine executables
    #[arg(long, default_value = "engines")]
    pub engines_dir: PathBuf,

    /// Directory with opening books
    #[arg(long, default_value = "books")]
    pub books_dir: PathBuf,

    /// Address of the display and board server
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: String,

    #[arg(long, default_value = "./static")]
    pub static_dir: PathBuf,

    /// Tick period of the control loop in milliseconds
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,

    /// Highest engine depth offered on the new game menu
    #[arg(long, default_value_t = 20)]
    pub max_depth: u8,

    /// Decode spare-piece patterns on the board as commands
    #[arg(long)]
    pub remote_control: bool,

    /// Stop on commands that are not valid in the current state
    #[arg(long)]
    pub strict: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Args {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chessboard-driver")
}

/// Reads and writes the two settings documents in the data dir
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: PathBuf) -> Self {
        SettingsStore { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned + Serialize + Default>(&self, file: &str) -> ConfigResult<T> {
        let path = self.dir.join(file);
        match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found, creating defaults", path.display());
                let value = T::default();
                self.write(file, &value)?;
                Ok(value)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn write<T: Serialize>(&self, file: &str, value: &T) -> ConfigResult<()> {
        let path = self.dir.join(file);
        let io = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io)?;
        let data = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, data).map_err(io)
    }

    pub fn load_game_settings(&self) -> ConfigResult<GameSettings> {
        self.read(GAME_SETTINGS_FILE)
    }

    pub fn save_game_settings(&self, settings: &GameSettings) -> ConfigResult<()> {
        self.write(GAME_SETTINGS_FILE, settings)
    }

    pub fn load_board_settings(&self) -> ConfigResult<BoardSettings> {
        self.read(BOARD_SETTINGS_FILE)
    }

    pub fn save_board_settings(&self, settings: &BoardSettings) -> ConfigResult<()> {
        self.write(BOARD_SETTINGS_FILE, settings)
    }

    /// Loads both documents, falling back to defaults when one is unreadable
    pub fn load_or_default(&self) -> (GameSettings, BoardSettings) {
        let game = self.load_game_settings().unwrap_or_else(|e| {
            warn!("Using default game settings: {}", e);
            GameSettings::default()
        });
        let board = self.load_board_settings().unwrap_or_else(|e| {
            warn!("Using default board settings: {}", e);
            BoardSettings::default()
        });
        (game, board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_created_and_reloaded() {
        let dir = std::env::temp_dir().join(format!("settings-{}", uuid::Uuid::new_v4()));
        let store = SettingsStore::new(dir.clone());
        let mut game = store.load_game_settings().unwrap();
        assert!(dir.join(GAME_SETTINGS_FILE).exists());
        game.game_engine.depth = 11;
        store.save_game_settings(&game).unwrap();
        assert_eq!(store.load_game_settings().unwrap().game_engine.depth, 11);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_malformed_settings_fall_back() {
        let dir = std::env::temp_dir().join(format!("settings-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(BOARD_SETTINGS_FILE), "{not json").unwrap();
        let store = SettingsStore::new(dir.clone());
        assert!(matches!(
            store.load_board_settings(),
            Err(ConfigError::Json { .. })
        ));
        let (_, board) = store.load_or_default();
        assert_eq!(board, BoardSettings::default());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["driver", "--remote-control", "--tick-ms", "50"]);
        assert!(args.remote_control);
        assert_eq!(args.tick_ms, 50);
        assert_eq!(args.max_depth, 20);
    }
}
