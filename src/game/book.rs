//! Opening book loaded from tab-separated move sequences, keyed by position hash.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::game::board::VirtualBoard;

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("failed reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("opening TSV is empty")]
    Empty,
    #[error("opening TSV must contain either a 'uci' or 'moves' column")]
    MissingColumn,
    #[error("illegal move '{token}' in opening row '{line}'")]
    IllegalMove { token: String, line: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMove {
    pub uci: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    by_hash: HashMap<u64, Vec<BookMove>>,
}

impl OpeningBook {
    pub fn from_tsv_path(path: &Path) -> Result<Self, BookError> {
        let data = fs::read_to_string(path).map_err(|source| BookError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_tsv_str(&data)
    }

    pub fn from_tsv_str(tsv: &str) -> Result<Self, BookError> {
        let mut lines = tsv.lines().filter(|line| !line.trim().is_empty());
        let header = lines.next().ok_or(BookError::Empty)?;
        let columns: Vec<&str> = header.split('\t').collect();

        let mut uci_idx = None;
        let mut moves_idx = None;
        let mut weight_idx = None;
        for (i, name) in columns.iter().enumerate() {
            match name.trim().to_ascii_lowercase().as_str() {
                "uci" => uci_idx = Some(i),
                "moves" => moves_idx = Some(i),
                "weight" | "count" | "plays" => weight_idx = Some(i),
                _ => {}
            }
        }
        let sequence_idx = uci_idx.or(moves_idx).ok_or(BookError::MissingColumn)?;

        let mut weights: HashMap<u64, HashMap<String, u32>> = HashMap::new();
        for line in lines {
            let fields: Vec<&str> = line.split('\t').collect();
            let Some(sequence) = fields.get(sequence_idx).map(|s| s.trim()) else {
                continue;
            };
            let row_weight = weight_idx
                .and_then(|idx| fields.get(idx))
                .and_then(|w| w.trim().parse::<u32>().ok())
                .unwrap_or(1)
                .max(1);

            let mut board = VirtualBoard::new();
            for token in sequence.split_whitespace() {
                let key = board.current().get_hash();
                let Some(mv) = board.push_uci(token) else {
                    return Err(BookError::IllegalMove {
                        token: token.to_string(),
                        line: line.to_string(),
                    });
                };
                let entry = weights
                    .entry(key)
                    .or_default()
                    .entry(mv.to_string())
                    .or_insert(0);
                *entry = entry.saturating_add(row_weight);
            }
        }

        let by_hash = weights
            .into_iter()
            .map(|(hash, moves)| {
                let mut row: Vec<BookMove> = moves
                    .into_iter()
                    .map(|(uci, weight)| BookMove { uci, weight })
                    .collect();
                // Highest weight first, ties in textual order
                row.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.uci.cmp(&b.uci)));
                (hash, row)
            })
            .collect();
        Ok(OpeningBook { by_hash })
    }

    pub fn moves_for(&self, board: &VirtualBoard) -> Option<&[BookMove]> {
        self.by_hash
            .get(&board.current().get_hash())
            .map(|v| v.as_slice())
    }

    /// Plies after which the book is no longer consulted for a search depth
    pub fn ply_limit(depth: u8) -> usize {
        6 * (depth as usize + 1)
    }

    /// Best book move for the position, if the game is still young enough
    pub fn probe(&self, board: &VirtualBoard, depth: u8) -> Option<String> {
        if board.ply() >= Self::ply_limit(depth) {
            return None;
        }
        self.moves_for(board)?
            .iter()
            .find(|m| board.parse_uci(&m.uci).is_some())
            .map(|m| m.uci.clone())
    }
}
