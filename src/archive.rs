//! Saved games: the starting position plus the moves played.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};
use crate::game::board::VirtualBoard;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SavedGame {
    pub starting_fen: String,
    pub moves: Vec<String>,
    pub play_white: bool,
    pub human_game: bool,
}

impl SavedGame {
    pub fn capture(board: &VirtualBoard, play_white: bool, human_game: bool) -> Self {
        SavedGame {
            starting_fen: board.start_fen().to_string(),
            moves: board.uci_moves(),
            play_white,
            human_game,
        }
    }

    /// Replays the moves onto the starting position
    pub fn replay(&self, name: &str) -> ConfigResult<VirtualBoard> {
        let corrupt = |message: String| ConfigError::CorruptGame {
            name: name.to_string(),
            message,
        };
        let mut board = VirtualBoard::from_fen(&self.starting_fen).map_err(|e| corrupt(e.to_string()))?;
        for mv in &self.moves {
            board
                .push_uci(mv)
                .ok_or_else(|| corrupt(format!("illegal move {}", mv)))?;
        }
        Ok(board)
    }
}

/// Storage of saved games
pub trait GameArchive: Send {
    fn list(&self) -> ConfigResult<Vec<String>>;
    fn load(&self, name: &str) -> ConfigResult<SavedGame>;
    fn save(&self, name: &str, game: &SavedGame) -> ConfigResult<()>;
    fn delete(&self, name: &str) -> ConfigResult<()>;
}

/// One JSON document per game in a directory
pub struct JsonArchive {
    dir: PathBuf,
}

impl JsonArchive {
    pub fn new(dir: PathBuf) -> Self {
        JsonArchive { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        let clean: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", clean))
    }

    fn io_error(path: &std::path::Path, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl GameArchive for JsonArchive {
    fn list(&self) -> ConfigResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&self.dir, e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
            .collect();
        // Newest names (timestamps) first
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    fn load(&self, name: &str) -> ConfigResult<SavedGame> {
        let path = self.path(name);
        let data = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MissingGame(name.to_string())
            } else {
                Self::io_error(&path, e)
            }
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    fn save(&self, name: &str, game: &SavedGame) -> ConfigResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        let path = self.path(name);
        let data = serde_json::to_string_pretty(game).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, data).map_err(|e| Self::io_error(&path, e))?;
        info!("Saved game {} ({} moves)", name, game.moves.len());
        Ok(())
    }

    fn delete(&self, name: &str) -> ConfigResult<()> {
        let path = self.path(name);
        fs::remove_file(&path).map_err(|e| Self::io_error(&path, e))?;
        info!("Deleted saved game {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_list_load_delete() {
        let dir = std::env::temp_dir().join(format!("archive-{}", uuid::Uuid::new_v4()));
        let archive = JsonArchive::new(dir.clone());
        assert!(archive.list().unwrap().is_empty());

        let mut board = VirtualBoard::new();
        board.push_uci("d2d4").unwrap();
        let game = SavedGame::capture(&board, false, false);
        archive.save("2024-01-01_1200", &game).unwrap();
        archive.save("2024-02-01_1200", &game).unwrap();
        assert_eq!(archive.list().unwrap(), vec!["2024-02-01_1200", "2024-01-01_1200"]);

        let loaded = archive.load("2024-01-01_1200").unwrap();
        assert_eq!(loaded, game);
        assert_eq!(loaded.replay("x").unwrap().placement(), board.placement());

        archive.delete("2024-01-01_1200").unwrap();
        assert!(matches!(
            archive.load("2024-01-01_1200"),
            Err(ConfigError::MissingGame(_))
        ));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_corrupt_replay() {
        let game = SavedGame {
            starting_fen: crate::game::board::START_FEN.to_string(),
            moves: vec!["e2e5".to_string()],
            play_white: true,
            human_game: true,
        };
        assert!(matches!(game.replay("bad"), Err(ConfigError::CorruptGame { .. })));

        let kingless = SavedGame {
            starting_fen: "8/8/8/8/8/8/8/8 w - - 0 1".to_string(),
            moves: Vec::new(),
            ..game
        };
        assert!(matches!(kingless.replay("empty"), Err(ConfigError::CorruptGame { .. })));
    }
}
