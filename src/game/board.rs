//! Move-annotated virtual board: the single source of truth for what was played.

use chess::{
    Board, BoardStatus, ChessMove, Color, File, MoveGen, Piece, Rank, Square, ALL_SQUARES,
};
use std::str::FromStr;

use crate::game::rules::{has_insufficient_material, Outcome, Termination};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Why a position could not be set up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("Malformed position {0}")]
    Malformed(String),
    #[error("Illegal position {0}")]
    Illegal(String),
}

#[derive(Debug, Clone)]
pub struct VirtualBoard {
    start_fen: String,
    start_halfmove: u32,
    start_fullmove: u32,
    /// positions[0] is the starting position, positions[i] follows moves[i - 1]
    positions: Vec<Board>,
    moves: Vec<ChessMove>,
    halfmove_clocks: Vec<u32>,
}

impl Default for VirtualBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBoard {
    pub fn new() -> Self {
        VirtualBoard {
            start_fen: START_FEN.to_string(),
            start_halfmove: 0,
            start_fullmove: 1,
            positions: vec![Board::default()],
            moves: Vec::new(),
            halfmove_clocks: vec![0],
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let placement = fen.split_whitespace().next().unwrap_or_default();
        check_material(&parse_placement(placement)?, fen)?;
        let board =
            Board::from_str(fen).map_err(|_| PositionError::Illegal(fen.to_string()))?;
        let fields: Vec<&str> = fen.split_whitespace().collect();
        let counter = |i: usize, default: u32| {
            fields.get(i).and_then(|f| f.parse().ok()).unwrap_or(default)
        };
        let start_halfmove = counter(4, 0);
        let start_fullmove = counter(5, 1).max(1);
        Ok(VirtualBoard {
            start_fen: fen.to_string(),
            start_halfmove,
            start_fullmove,
            positions: vec![board],
            moves: Vec::new(),
            halfmove_clocks: vec![start_halfmove],
        })
    }

    /// Sets up a position from a bare piece placement; castling rights are
    /// granted wherever king and rook still stand on their home squares.
    pub fn from_placement(placement: &str, side: Color) -> Result<Self, PositionError> {
        let squares = parse_placement(placement)?;
        let at = |name: &str, piece: char| {
            square_index(name).is_some_and(|i| squares[i] == Some(piece))
        };
        let mut castling = String::new();
        if at("e1", 'K') && at("h1", 'R') {
            castling.push('K');
        }
        if at("e1", 'K') && at("a1", 'R') {
            castling.push('Q');
        }
        if at("e8", 'k') && at("h8", 'r') {
            castling.push('k');
        }
        if at("e8", 'k') && at("a8", 'r') {
            castling.push('q');
        }
        if castling.is_empty() {
            castling.push('-');
        }
        let side = if side == Color::White { "w" } else { "b" };
        Self::from_fen(&format!("{} {} {} - 0 1", placement, side, castling))
    }

    pub fn start_fen(&self) -> &str {
        &self.start_fen
    }

    pub fn current(&self) -> &Board {
        // positions is never empty
        &self.positions[self.positions.len() - 1]
    }

    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn moves(&self) -> &[ChessMove] {
        &self.moves
    }

    pub fn uci_moves(&self) -> Vec<String> {
        self.moves.iter().map(|m| m.to_string()).collect()
    }

    pub fn last_move(&self) -> Option<ChessMove> {
        self.moves.last().copied()
    }

    pub fn side_to_move(&self) -> Color {
        self.current().side_to_move()
    }

    pub fn is_check(&self) -> bool {
        self.current().checkers().popcnt() > 0
    }

    pub fn king_square(&self, color: Color) -> Square {
        self.current().king_square(color)
    }

    /// Legal moves in textual order
    pub fn legal_moves(&self) -> Vec<ChessMove> {
        let mut moves: Vec<ChessMove> = MoveGen::new_legal(self.current()).collect();
        moves.sort_by_key(|m| m.to_string());
        moves
    }

    pub fn parse_uci(&self, uci: &str) -> Option<ChessMove> {
        let uci = uci.trim();
        MoveGen::new_legal(self.current()).find(|m| m.to_string() == uci)
    }

    pub fn is_capture(&self, mv: ChessMove) -> bool {
        let board = self.current();
        board.piece_on(mv.get_dest()).is_some()
            || (board.piece_on(mv.get_source()) == Some(Piece::Pawn)
                && mv.get_source().get_file() != mv.get_dest().get_file())
    }

    /// Plays a move, refusing anything illegal
    pub fn push(&mut self, mv: ChessMove) -> bool {
        if !self.current().legal(mv) {
            return false;
        }
        let resets = self.is_capture(mv)
            || self.current().piece_on(mv.get_source()) == Some(Piece::Pawn);
        let clock = if resets {
            0
        } else {
            self.halfmove_clocks.last().copied().unwrap_or(0) + 1
        };
        let next = self.current().make_move_new(mv);
        self.positions.push(next);
        self.moves.push(mv);
        self.halfmove_clocks.push(clock);
        true
    }

    pub fn push_uci(&mut self, uci: &str) -> Option<ChessMove> {
        let mv = self.parse_uci(uci)?;
        self.push(mv).then_some(mv)
    }

    pub fn pop(&mut self) -> Option<ChessMove> {
        let mv = self.moves.pop()?;
        self.positions.pop();
        self.halfmove_clocks.pop();
        Some(mv)
    }

    /// Copy of this game truncated to `ply` moves
    pub fn at_ply(&self, ply: usize) -> VirtualBoard {
        let mut copy = self.clone();
        while copy.ply() > ply {
            copy.pop();
        }
        copy
    }

    pub fn placement(&self) -> String {
        placement_of(self.current())
    }

    /// Full FEN including move counters
    pub fn fen(&self) -> String {
        let board_fen = self.current().to_string();
        let head: Vec<&str> = board_fen.split_whitespace().take(4).collect();
        let halfmove = self.halfmove_clocks.last().copied().unwrap_or(0);
        let start_black = self.positions[0].side_to_move() == Color::Black;
        let fullmove = self.start_fullmove as usize + (self.ply() + start_black as usize) / 2;
        format!("{} {} {}", head.join(" "), halfmove, fullmove)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        let board = self.current();
        match board.status() {
            BoardStatus::Checkmate => {
                return Some(Outcome {
                    termination: Termination::Checkmate,
                    winner: Some(!board.side_to_move()),
                })
            }
            BoardStatus::Stalemate => return Some(Outcome::draw(Termination::Stalemate)),
            BoardStatus::Ongoing => {}
        }
        if has_insufficient_material(board) {
            return Some(Outcome::draw(Termination::InsufficientMaterial));
        }
        let hash = board.get_hash();
        if self.positions.iter().filter(|b| b.get_hash() == hash).count() >= 5 {
            return Some(Outcome::draw(Termination::FivefoldRepetition));
        }
        if self.halfmove_clocks.last().copied().unwrap_or(0) >= 150 {
            return Some(Outcome::draw(Termination::SeventyFiveMoves));
        }
        None
    }

    /// Starting-position offset of the move counters, used for saved games
    pub fn start_counters(&self) -> (u32, u32) {
        (self.start_halfmove, self.start_fullmove)
    }
}

/// One king per side and no pawns on the back ranks; the chess crate
/// assumes both when it builds a board.
fn check_material(squares: &[Option<char>; 64], fen: &str) -> Result<(), PositionError> {
    let count = |piece: char| squares.iter().filter(|s| **s == Some(piece)).count();
    let back_rank_pawn = squares[..8]
        .iter()
        .chain(&squares[56..])
        .any(|s| matches!(s, Some('p' | 'P')));
    if count('K') != 1 || count('k') != 1 || back_rank_pawn {
        return Err(PositionError::Illegal(fen.to_string()));
    }
    Ok(())
}

fn square_index(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let file = bytes[0].checked_sub(b'a')? as usize;
    let rank = bytes[1].checked_sub(b'1')? as usize;
    (file < 8 && rank < 8).then_some(rank * 8 + file)
}

/// Piece placement field of a board, rank 8 first
pub fn placement_of(board: &Board) -> String {
    let mut rows = Vec::with_capacity(8);
    for rank in (0..8).rev() {
        let mut row = String::new();
        let mut empty = 0;
        for file in 0..8 {
            let square = Square::make_square(Rank::from_index(rank), File::from_index(file));
            match (board.piece_on(square), board.color_on(square)) {
                (Some(piece), Some(color)) => {
                    if empty > 0 {
                        row.push_str(&empty.to_string());
                        empty = 0;
                    }
                    row.push_str(&piece.to_string(color));
                }
                _ => empty += 1,
            }
        }
        if empty > 0 {
            row.push_str(&empty.to_string());
        }
        rows.push(row);
    }
    rows.join("/")
}

/// Expands a placement into 64 optional piece letters indexed a1 = 0
pub fn parse_placement(placement: &str) -> Result<[Option<char>; 64], PositionError> {
    let malformed = || PositionError::Malformed(placement.to_string());
    let rows: Vec<&str> = placement.split('/').collect();
    if rows.len() != 8 {
        return Err(malformed());
    }
    let mut squares = [None; 64];
    for (i, row) in rows.iter().enumerate() {
        let rank = 7 - i;
        let mut file = 0usize;
        for c in row.chars() {
            if let Some(skip) = c.to_digit(10) {
                file += skip as usize;
            } else if "pnbrqkPNBRQK".contains(c) {
                if file >= 8 {
                    return Err(malformed());
                }
                squares[rank * 8 + file] = Some(c);
                file += 1;
            } else {
                return Err(malformed());
            }
        }
        if file != 8 {
            return Err(malformed());
        }
    }
    Ok(squares)
}

/// Inverse of [`parse_placement`]
pub fn format_placement(squares: &[Option<char>; 64]) -> String {
    let mut rows = Vec::with_capacity(8);
    for rank in (0..8).rev() {
        let mut row = String::new();
        let mut empty = 0;
        for file in 0..8 {
            match squares[rank * 8 + file] {
                Some(piece) => {
                    if empty > 0 {
                        row.push_str(&empty.to_string());
                        empty = 0;
                    }
                    row.push(piece);
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            row.push_str(&empty.to_string());
        }
        rows.push(row);
    }
    rows.join("/")
}

/// The board's placement with the pieces on `squares` lifted off
pub fn placement_without(board: &VirtualBoard, squares: &[Square]) -> String {
    let placement = board.placement();
    let Ok(mut expanded) = parse_placement(&placement) else {
        return placement;
    };
    for sq in squares {
        expanded[sq.to_index()] = None;
    }
    format_placement(&expanded)
}

/// Squares whose content differs between two placements, in a1..h8 order
pub fn differing_squares(a: &str, b: &str) -> Vec<String> {
    match (parse_placement(a), parse_placement(b)) {
        (Ok(a), Ok(b)) => ALL_SQUARES
            .iter()
            .filter(|sq| a[sq.to_index()] != b[sq.to_index()])
            .map(|sq| sq.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Placement as seen from the other side of the board
pub fn rotate_placement(placement: &str) -> String {
    let mut rows: Vec<String> = placement
        .split('/')
        .map(|row| row.chars().rev().collect())
        .collect();
    rows.reverse();
    rows.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_and_fen() {
        let mut board = VirtualBoard::new();
        assert!(board.push_uci("e2e4").is_some());
        let fen = board.fen();
        assert!(fen.starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq "));
        assert!(fen.ends_with(" 0 1"));
        board.push_uci("g8f6").unwrap();
        assert!(board.fen().ends_with(" 1 2"));
        assert_eq!(board.pop().map(|m| m.to_string()), Some("g8f6".to_string()));
        assert_eq!(board.ply(), 1);
        assert!(board.push_uci("e4e6").is_none());
    }

    #[test]
    fn test_placement_roundtrip_and_rotation() {
        let board = VirtualBoard::new();
        assert_eq!(board.placement(), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
        assert_eq!(
            rotate_placement(&board.placement()),
            "RNBKQBNR/PPPPPPPP/8/8/8/8/pppppppp/rnbkqbnr"
        );
        assert!(parse_placement("8/8/8").is_err());
        assert!(parse_placement("9/8/8/8/8/8/8/8").is_err());
    }

    #[test]
    fn test_lifting_pieces() {
        let board = VirtualBoard::new();
        let lifted = placement_without(&board, &[Square::E1, Square::E8]);
        assert_eq!(lifted, "rnbq1bnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQ1BNR");
        assert_eq!(format_placement(&parse_placement(&lifted).unwrap()), lifted);
    }

    #[test]
    fn test_differing_squares() {
        let mut board = VirtualBoard::new();
        let before = board.placement();
        board.push_uci("e2e4").unwrap();
        assert_eq!(differing_squares(&before, &board.placement()), vec!["e2", "e4"]);
    }

    #[test]
    fn test_from_placement_grants_castling() {
        let board =
            VirtualBoard::from_placement("r3k3/8/8/8/8/8/8/4K2R", Color::White).unwrap();
        let rights = board.current().castle_rights(Color::White);
        assert!(rights.has_kingside() && !rights.has_queenside());
        assert!(board.current().castle_rights(Color::Black).has_queenside());
    }

    #[test]
    fn test_positions_without_kings_are_rejected() {
        let illegal = |placement: &str| {
            matches!(
                VirtualBoard::from_placement(placement, Color::White),
                Err(PositionError::Illegal(_))
            )
        };
        assert!(illegal("8/8/8/8/8/8/8/8"));
        // King lifted off e1
        assert!(illegal("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQ1BNR"));
        assert!(illegal("4k3/8/8/8/8/8/8/2K1K3"));
        assert!(illegal("P3k3/8/8/8/8/8/8/4K3"));
        assert!(illegal("4k3/8/8/8/8/8/8/p3K3"));
        assert!(matches!(
            VirtualBoard::from_fen("4k3/8/8/8/8/8/8/8 w - - 0 1"),
            Err(PositionError::Illegal(_))
        ));
        assert!(matches!(
            VirtualBoard::from_fen("not a fen"),
            Err(PositionError::Malformed(_))
        ));
        assert!(VirtualBoard::from_placement("4k3/8/8/8/8/8/8/4K3", Color::Black).is_ok());
    }

    #[test]
    fn test_outcomes() {
        let mut board = VirtualBoard::new();
        for mv in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            board.push_uci(mv).unwrap();
        }
        let outcome = board.outcome().unwrap();
        assert_eq!(outcome.termination, Termination::Checkmate);
        assert_eq!(outcome.winner, Some(Color::Black));

        let mut shuffle = VirtualBoard::new();
        for _ in 0..4 {
            for mv in ["g1f3", "g8f6", "f3g1", "f6g8"] {
                assert!(shuffle.outcome().is_none());
                shuffle.push_uci(mv).unwrap();
            }
        }
        assert_eq!(
            shuffle.outcome().map(|o| o.termination),
            Some(Termination::FivefoldRepetition)
        );
    }
}
