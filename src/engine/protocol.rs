//! Line protocol spoken by external chess engines.

use std::fmt::Write;

/// Score as reported by the engine, from the side to move's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    /// Convert to centipawns for comparison. Mate scores use large values.
    pub fn to_cp(&self) -> i32 {
        match self {
            Self::Centipawns(cp) => *cp,
            Self::Mate(m) => {
                if *m > 0 {
                    30000 - *m * 100
                } else {
                    -30000 - *m * 100
                }
            }
        }
    }

    /// Negate the score (flip perspective).
    pub fn negate(&self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }
}

/// Parsed `info` line; fields missing from the line stay empty
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoLine {
    /// 1-based variation number
    pub multipv: usize,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    /// Name of an option the engine supports
    Option(String),
    Info(InfoLine),
    /// `None` when the engine has no move (`bestmove (none)`)
    BestMove(Option<String>),
    Other,
}

pub fn parse_line(line: &str) -> EngineLine {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.first().copied() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("option") => parse_option(&parts).map_or(EngineLine::Other, EngineLine::Option),
        Some("info") => EngineLine::Info(parse_info(&parts)),
        Some("bestmove") => {
            let mv = parts
                .get(1)
                .filter(|mv| !matches!(**mv, "(none)" | "0000" | "none"))
                .map(|mv| mv.to_string());
            EngineLine::BestMove(mv)
        }
        _ => EngineLine::Other,
    }
}

fn parse_option(parts: &[&str]) -> Option<String> {
    let name_at = parts.iter().position(|&p| p == "name")?;
    let type_at = parts.iter().position(|&p| p == "type").unwrap_or(parts.len());
    (type_at > name_at + 1).then(|| parts[name_at + 1..type_at].join(" "))
}

fn parse_info(parts: &[&str]) -> InfoLine {
    let mut info = InfoLine {
        multipv: 1,
        ..InfoLine::default()
    };
    let mut i = 1;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                info.depth = parts.get(i + 1).and_then(|d| d.parse().ok());
                i += 2;
            }
            "multipv" => {
                info.multipv = parts
                    .get(i + 1)
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(1)
                    .max(1);
                i += 2;
            }
            "score" => {
                let value = parts.get(i + 2).and_then(|v| v.parse().ok());
                info.score = match (parts.get(i + 1).copied(), value) {
                    (Some("cp"), Some(cp)) => Some(Score::Centipawns(cp)),
                    (Some("mate"), Some(m)) => Some(Score::Mate(m)),
                    _ => None,
                };
                i += 3;
            }
            "pv" => {
                // The principal variation runs to the end of the line
                info.pv = parts[i + 1..].iter().map(|m| m.to_string()).collect();
                break;
            }
            _ => i += 1,
        }
    }
    info
}

pub fn position_command(start_fen: &str, moves: &[String]) -> String {
    let mut cmd = format!("position fen {}", start_fen);
    if !moves.is_empty() {
        cmd.push_str(" moves");
        for mv in moves {
            let _ = write!(cmd, " {}", mv);
        }
    }
    cmd
}

pub fn go_command(depth: u8, root_moves: Option<&[String]>) -> String {
    let mut cmd = format!("go depth {}", depth);
    if let Some(moves) = root_moves.filter(|m| !m.is_empty()) {
        cmd.push_str(" searchmoves");
        for mv in moves {
            let _ = write!(cmd, " {}", mv);
        }
    }
    cmd
}

pub fn setoption_command(name: &str, value: &str) -> String {
    format!("setoption name {} value {}", name, value)
}

/// Formats a white-relative centipawn score for display
pub fn format_score(score: i32) -> String {
    let sign = if score > 0 { "+" } else { "" };
    if score.abs() >= 10_000 {
        format!("{}{}k", sign, score.div_euclid(1000))
    } else {
        format!("{}{}", sign, score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let line = "info depth 12 seldepth 18 multipv 2 score cp -35 nodes 1000 pv e7e5 g1f3 b8c6";
        let EngineLine::Info(info) = parse_line(line) else {
            panic!("not an info line");
        };
        assert_eq!(info.multipv, 2);
        assert_eq!(info.depth, Some(12));
        assert_eq!(info.score, Some(Score::Centipawns(-35)));
        assert_eq!(info.pv, vec!["e7e5", "g1f3", "b8c6"]);
    }

    #[test]
    fn test_partial_info() {
        let EngineLine::Info(info) = parse_line("info depth 3 currmove e2e4") else {
            panic!("not an info line");
        };
        assert_eq!(info.multipv, 1);
        assert!(info.score.is_none());
        assert!(info.pv.is_empty());
    }

    #[test]
    fn test_other_lines() {
        assert_eq!(parse_line("uciok"), EngineLine::UciOk);
        assert_eq!(
            parse_line("option name Skill Level type spin default 20 min 0 max 20"),
            EngineLine::Option("Skill Level".to_string())
        );
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5"),
            EngineLine::BestMove(Some("e2e4".to_string()))
        );
        assert_eq!(parse_line("bestmove (none)"), EngineLine::BestMove(None));
        assert_eq!(parse_line("id name Fish"), EngineLine::Other);
    }

    #[test]
    fn test_mate_scores() {
        assert_eq!(Score::Mate(3).to_cp(), 29700);
        assert_eq!(Score::Mate(-2).to_cp(), -29800);
        assert_eq!(Score::Mate(2).negate(), Score::Mate(-2));
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(35), "+35");
        assert_eq!(format_score(-120), "-120");
        assert_eq!(format_score(0), "0");
        assert_eq!(format_score(29700), "+29k");
        assert_eq!(format_score(-29800), "-30k");
    }

    #[test]
    fn test_commands() {
        let moves = vec!["e2e4".to_string(), "e7e5".to_string()];
        assert_eq!(
            position_command("startfen", &moves),
            "position fen startfen moves e2e4 e7e5"
        );
        assert_eq!(position_command("f", &[]), "position fen f");
        assert_eq!(go_command(5, None), "go depth 5");
        assert_eq!(go_command(5, Some(&moves)), "go depth 5 searchmoves e2e4 e7e5");
    }
}
