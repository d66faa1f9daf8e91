//! Ranks of the board read as number dials.
//!
//! Rows are placement rows as written in a FEN, rank 8 first.

/// Two spare queens in one row: first value of each leftmost-gap band
const TWO_QUEEN_LEVELS: [i32; 8] = [16, 30, 42, 52, 60, 66, 70, 72];

fn digit(c: Option<char>) -> i32 {
    c.and_then(|c| c.to_digit(10)).map_or(0, |d| d as i32)
}

/// 1-8 for the file of a lone `piece` in an otherwise empty row, 0 otherwise
pub fn row_0_to_8(row: &str, piece: char, ignore_color: bool) -> u8 {
    let (row, piece) = if ignore_color {
        (row.to_ascii_lowercase(), piece.to_ascii_lowercase())
    } else {
        (row.to_string(), piece)
    };
    for i in 0..8u8 {
        let prefix = if i > 0 { i.to_string() } else { String::new() };
        let suffix = if i < 7 { (7 - i).to_string() } else { String::new() };
        if row == format!("{}{}{}", prefix, piece, suffix) {
            return i + 1;
        }
    }
    0
}

/// 0-71 from one or two queens in a row.
///
/// One queen counts 0-7 by file, 8-15 when it is black. Two queens select a
/// band by the empty squares left of them, a value inside the band by the
/// empty squares right of them, and the upper half of the band when the
/// black queen comes first.
pub fn row_0_to_71(row: &str) -> usize {
    let num = if row.contains('Q') && row.contains('q') {
        let left = digit(row.chars().next()) as usize;
        let (base, next) = match (TWO_QUEEN_LEVELS.get(left), TWO_QUEEN_LEVELS.get(left + 1)) {
            (Some(&base), Some(&next)) => (base, next),
            _ => return 0,
        };
        let diff = (next - base) / 2;
        let mut extra = diff - digit(row.chars().last());
        if row.chars().find(|c| *c == 'Q' || *c == 'q') == Some('q') {
            extra += diff;
        }
        base + extra
    } else {
        let mut num = 8 - digit(row.chars().last());
        if row.contains('q') {
            num += 8;
        }
        num
    };
    (num - 1).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_piece_dial() {
        assert_eq!(row_0_to_8("3q4", 'q', true), 4);
        assert_eq!(row_0_to_8("3Q4", 'q', true), 4);
        assert_eq!(row_0_to_8("Q7", 'q', true), 1);
        assert_eq!(row_0_to_8("7q", 'q', true), 8);
        assert_eq!(row_0_to_8("3k4", 'K', false), 0);
        assert_eq!(row_0_to_8("3K4", 'K', false), 4);
        assert_eq!(row_0_to_8("8", 'q', true), 0);
        assert_eq!(row_0_to_8("2qq4", 'q', true), 0);
    }

    #[test]
    fn test_two_queen_dial() {
        assert_eq!(row_0_to_71("Q7"), 0);
        assert_eq!(row_0_to_71("7Q"), 7);
        assert_eq!(row_0_to_71("q7"), 8);
        assert_eq!(row_0_to_71("7q"), 15);
        // Band 0 spans 16..30
        assert_eq!(row_0_to_71("Qq6"), 16);
        assert_eq!(row_0_to_71("Q6q"), 22);
        assert_eq!(row_0_to_71("qQ6"), 23);
        assert_eq!(row_0_to_71("6qQ"), 71);
    }
}
