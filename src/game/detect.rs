//! Explains a physical layout in terms of legal moves on the virtual board.

use chess::{ChessMove, MoveGen};

use crate::game::board::{placement_of, VirtualBoard};

/// Ranking key: fewer plies, fewer touched squares, fewer captures, then text
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    plies: usize,
    touched: usize,
    captures: usize,
    text: String,
}

fn rank(board: &VirtualBoard, moves: &[ChessMove]) -> Rank {
    let mut touched: Vec<_> = moves
        .iter()
        .flat_map(|m| [m.get_source(), m.get_dest()])
        .collect();
    touched.sort();
    touched.dedup();
    let mut replay = board.clone();
    let mut captures = 0;
    for mv in moves {
        if replay.is_capture(*mv) {
            captures += 1;
        }
        replay.push(*mv);
    }
    Rank {
        plies: moves.len(),
        touched: touched.len(),
        captures,
        text: moves.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(" "),
    }
}

/// Finds the move (or, for two-player games, the pair of moves) leading from
/// the virtual position to `physical`. Deterministic for equal inputs.
pub fn detect_moves(
    board: &VirtualBoard,
    physical: &str,
    allow_double: bool,
) -> Option<Vec<ChessMove>> {
    let current = board.current();
    let mut candidates: Vec<Vec<ChessMove>> = MoveGen::new_legal(current)
        .filter(|mv| placement_of(&current.make_move_new(*mv)) == physical)
        .map(|mv| vec![mv])
        .collect();

    if candidates.is_empty() && allow_double {
        for first in MoveGen::new_legal(current) {
            let after = current.make_move_new(first);
            for second in MoveGen::new_legal(&after) {
                if placement_of(&after.make_move_new(second)) == physical {
                    candidates.push(vec![first, second]);
                }
            }
        }
    }

    candidates
        .into_iter()
        .map(|moves| (rank(board, &moves), moves))
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, moves)| moves)
}

/// Number of plies to undo for the physical layout to match an earlier
/// position (one or two plies back).
pub fn detect_take_back(board: &VirtualBoard, physical: &str) -> Option<usize> {
    (1..=2.min(board.ply())).find(|&plies| board.at_ply(board.ply() - plies).placement() == physical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn played(moves: &[&str]) -> VirtualBoard {
        let mut board = VirtualBoard::new();
        for mv in moves {
            board.push_uci(mv).unwrap();
        }
        board
    }

    #[test]
    fn test_single_move_is_detected() {
        let board = VirtualBoard::new();
        let physical = played(&["e2e4"]).placement();
        let moves = detect_moves(&board, &physical, false).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].to_string(), "e2e4");
    }

    #[test]
    fn test_double_move_only_when_allowed() {
        let board = VirtualBoard::new();
        let physical = played(&["e2e4", "e7e5"]).placement();
        assert!(detect_moves(&board, &physical, false).is_none());
        let moves = detect_moves(&board, &physical, true).unwrap();
        let text: Vec<_> = moves.iter().map(|m| m.to_string()).collect();
        assert_eq!(text, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let board = played(&["e2e4", "d7d5"]);
        let physical = played(&["e2e4", "d7d5", "e4d5"]).placement();
        let first = detect_moves(&board, &physical, true);
        for _ in 0..5 {
            assert_eq!(detect_moves(&board, &physical, true), first);
        }
        assert_eq!(first.unwrap()[0].to_string(), "e4d5");
    }

    #[test]
    fn test_unexplained_layout() {
        let board = VirtualBoard::new();
        assert!(detect_moves(&board, "8/8/8/8/8/8/8/8", true).is_none());
    }

    #[test]
    fn test_take_back_detection() {
        let board = played(&["e2e4"]);
        assert_eq!(detect_take_back(&board, &VirtualBoard::new().placement()), Some(1));
        let board = played(&["e2e4", "e7e5"]);
        assert_eq!(detect_take_back(&board, &VirtualBoard::new().placement()), Some(2));
        assert_eq!(detect_take_back(&VirtualBoard::new(), "8/8/8/8/8/8/8/8"), None);
    }
}
