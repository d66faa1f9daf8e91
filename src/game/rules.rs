use chess::{Board, Color, Piece, ALL_SQUARES};
use std::fmt;

/// Convert a chess color to a string
pub fn color_to_string(color: Color) -> String {
    match color {
        Color::White => "white".to_string(),
        Color::Black => "black".to_string(),
    }
}

/// Why a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FivefoldRepetition,
    SeventyFiveMoves,
    /// The side to move ran out of time
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub termination: Termination,
    pub winner: Option<Color>,
}

impl Outcome {
    pub fn draw(termination: Termination) -> Self {
        Outcome {
            termination,
            winner: None,
        }
    }

    /// Result in PGN notation
    pub fn result(&self) -> &'static str {
        match self.winner {
            Some(Color::White) => "1-0",
            Some(Color::Black) => "0-1",
            None => "1/2-1/2",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.termination {
            Termination::Checkmate => "checkmate",
            Termination::Stalemate => "stalemate",
            Termination::InsufficientMaterial => "insufficient material",
            Termination::FivefoldRepetition => "fivefold repetition",
            Termination::SeventyFiveMoves => "75-move rule",
            Termination::Time => "time",
        };
        match self.winner {
            Some(color) => write!(f, "{} ({} wins by {})", self.result(), color_to_string(color), reason),
            None => write!(f, "{} (draw by {})", self.result(), reason),
        }
    }
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(board: &Board) -> bool {
    // Minor pieces per side; anything heavier or a pawn means mate is possible
    let mut knights = [0u8; 2];
    let mut bishop_square_colors: [Vec<usize>; 2] = [Vec::new(), Vec::new()];

    for square in ALL_SQUARES {
        let (Some(piece), Some(color)) = (board.piece_on(square), board.color_on(square)) else {
            continue;
        };
        let side = color.to_index();
        match piece {
            Piece::King => {}
            Piece::Knight => knights[side] += 1,
            Piece::Bishop => {
                bishop_square_colors[side]
                    .push((square.get_rank().to_index() + square.get_file().to_index()) % 2);
            }
            Piece::Pawn | Piece::Rook | Piece::Queen => return false,
        }
    }

    let minors = |side: usize| knights[side] as usize + bishop_square_colors[side].len();
    match (minors(0), minors(1)) {
        // King vs King, or a single minor piece against a bare king
        (0, 0) | (1, 0) | (0, 1) => true,
        // King and Bishop vs King and Bishop (bishops on same color)
        (1, 1) => match (&bishop_square_colors[0][..], &bishop_square_colors[1][..]) {
            ([white], [black]) => white == black,
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn board(fen: &str) -> Board {
        Board::from_str(fen).unwrap()
    }

    #[test]
    fn test_insufficient_material() {
        assert!(has_insufficient_material(&board("8/8/4k3/8/8/2K5/8/8 w - - 0 1")));
        assert!(has_insufficient_material(&board("8/8/4k3/8/8/2KN4/8/8 w - - 0 1")));
        // Bishops on the same square colour
        assert!(has_insufficient_material(&board("8/8/4k3/8/2b5/2KB4/8/8 w - - 0 1")));
        // Bishops on opposite colours can still mate
        assert!(!has_insufficient_material(&board("8/8/4k3/8/3b4/2KB4/8/8 w - - 0 1")));
        assert!(!has_insufficient_material(&board("8/8/4k3/8/8/2KNN3/8/8 w - - 0 1")));
        assert!(!has_insufficient_material(&Board::default()));
    }

    #[test]
    fn test_outcome_display() {
        let mate = Outcome {
            termination: Termination::Checkmate,
            winner: Some(Color::Black),
        };
        assert_eq!(mate.to_string(), "0-1 (black wins by checkmate)");
        assert_eq!(Outcome::draw(Termination::Stalemate).result(), "1/2-1/2");
    }
}
