use chess::{Color, Square};
use log::{debug, info};
use std::time::{Duration, Instant};

use crate::game::board::placement_without;
use crate::models::{Command, GameState, LedCommand, LedPattern, Session, SettingChange, Side, TimeControl};
use crate::remote::dials::{row_0_to_71, row_0_to_8};
use crate::sensor::Reading;

const COOLDOWN: Duration = Duration::from_secs(3);
const EXIT_CONFIRM: Duration = Duration::from_secs(5);
/// Extra quiet time after an implicit hint request
const HINT_QUIET: Duration = Duration::from_secs(2);
/// Time to set up a position before a game starts from the board
const BOARD_SETUP: Duration = Duration::from_secs(20);

const HOME_ROWS: &str = "rnbqkbnr/pppppppp/PPPPPPPP/RNBQKBNR";
const KINGS_OUT_ROWS: [&str; 3] = [
    "rnbq1bnr/pppppppp/PPPPPPPP/RNBQKBNR",
    "rnbqkbnr/pppppppp/PPPPPPPP/RNBQ1BNR",
    "rnbq1bnr/pppppppp/PPPPPPPP/RNBQ1BNR",
];

/// Result of looking at one board reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub command: Option<Command>,
    pub exit_application: bool,
    pub leds: Option<LedCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitKind {
    Game,
    Application,
}

impl ExitKind {
    fn name(self) -> &'static str {
        match self {
            ExitKind::Game => "game",
            ExitKind::Application => "application",
        }
    }
}

fn row<'a>(rows: &[&'a str], i: usize) -> &'a str {
    rows.get(i).copied().unwrap_or("")
}

fn queen_dial(rows: &[&str], i: usize) -> u8 {
    row_0_to_8(row(rows, i), 'q', true)
}

/// Both kings on d/e of ranks 5 and 4, on the same file or diagonally
fn kings_in_exit_position(rows: &[&str], kind: ExitKind) -> bool {
    let centre = format!("{}/{}", row(rows, 3), row(rows, 4)).to_ascii_lowercase();
    match kind {
        ExitKind::Game => centre == "4k3/3k4" || centre == "3k4/4k3",
        ExitKind::Application => centre == "4k3/4k3" || centre == "3k4/3k4",
    }
}

/// Keeps the last change per setting
fn collapse(changes: Vec<SettingChange>) -> Vec<SettingChange> {
    let mut out: Vec<SettingChange> = Vec::new();
    for change in changes {
        out.retain(|c| c.key() != change.key());
        out.push(change);
    }
    out
}

/// Turns deliberate spare-piece arrangements on the board into commands.
#[derive(Debug)]
pub struct CommandDecoder {
    on: bool,
    cooldown: Duration,
    exit_confirm: Duration,
    quiet_until: Option<Instant>,
    game_exit_since: Option<Instant>,
    app_exit_since: Option<Instant>,
    start_pending: bool,
    can_calibrate: bool,
    /// Layout that produced the last command; it will not fire again
    latched: Option<String>,
}

impl CommandDecoder {
    pub fn new(on: bool) -> Self {
        CommandDecoder {
            on,
            cooldown: COOLDOWN,
            exit_confirm: EXIT_CONFIRM,
            quiet_until: None,
            game_exit_since: None,
            app_exit_since: None,
            start_pending: false,
            can_calibrate: true,
            latched: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn set_on(&mut self, on: bool) {
        if on != self.on {
            debug!("Remote control is turned {}", if on { "ON" } else { "OFF" });
            self.on = on;
            self.game_exit_since = None;
            self.app_exit_since = None;
            self.start_pending = false;
        }
    }

    /// An exit gesture is being held but not yet confirmed
    pub fn exit_pending(&self) -> bool {
        self.game_exit_since.is_some() || self.app_exit_since.is_some()
    }

    /// Forgets gestures that belong to the state being left
    pub fn on_state_change(&mut self, from: GameState, to: GameState) {
        if from == GameState::NewGame && to != GameState::NewGame {
            self.start_pending = false;
        }
        if from.is_game() && !to.is_game() {
            self.game_exit_since = None;
        }
    }

    fn quiet(&self, now: Instant) -> bool {
        self.quiet_until.is_some_and(|t| now < t)
    }

    fn is_latched(&self, reading: &Reading) -> bool {
        self.latched.as_deref() == Some(reading.layout.as_str())
    }

    fn fire(&mut self, reading: &Reading, now: Instant, extra: Duration) {
        self.quiet_until = Some(now + self.cooldown + extra);
        self.latched = Some(reading.layout.clone());
    }

    pub fn decode(&mut self, state: GameState, reading: &Reading, session: &Session, now: Instant) -> Decoded {
        let mut out = Decoded::default();
        if !self.on {
            return out;
        }
        if self.latched.is_some() && !self.is_latched(reading) {
            self.latched = None;
        }

        match state {
            GameState::Home => out.command = self.home(reading, now, &mut out.leds),
            GameState::NewGame => out.command = self.new_game(reading, session, now, &mut out.leds),
            s if s.is_game() => out.command = self.game(s, reading, session, now),
            _ => {}
        }

        let rows = reading.rows();
        let app_exit = kings_in_exit_position(&rows, ExitKind::Application);
        if self.try_exit(ExitKind::Application, app_exit, now) {
            info!("Exit application requested from the board");
            out.exit_application = true;
        }
        if !state.is_game() && self.exit_pending() {
            out.leds = Some(LedCommand::Flash {
                pattern: LedPattern::All,
            });
        }
        out
    }

    /// Two-phase exit: the pattern must stay for the whole confirmation time
    fn try_exit(&mut self, kind: ExitKind, present: bool, now: Instant) -> bool {
        let quiet = self.quiet(now);
        let confirm = self.exit_confirm;
        let since = match kind {
            ExitKind::Game => &mut self.game_exit_since,
            ExitKind::Application => &mut self.app_exit_since,
        };
        if !present {
            if since.take().is_some() {
                debug!("Exit {} aborted", kind.name());
            }
            return false;
        }
        match *since {
            None => {
                debug!("Exit {} initiated", kind.name());
                *since = Some(now);
                false
            }
            Some(start) if !quiet && now.saturating_duration_since(start) >= confirm => {
                debug!("Exit {} confirmed", kind.name());
                *since = None;
                true
            }
            Some(_) => false,
        }
    }

    fn home(&mut self, reading: &Reading, now: Instant, leds: &mut Option<LedCommand>) -> Option<Command> {
        if self.quiet(now) || self.is_latched(reading) {
            return None;
        }
        let rows = reading.rows();
        if queen_dial(&rows, 3) == 4 && queen_dial(&rows, 4) == 4 {
            debug!("Remote control: new game");
            self.fire(reading, now, Duration::ZERO);
            *leds = Some(LedCommand::Set {
                pattern: LedPattern::Corners,
            });
            return Some(Command::NewGame);
        }
        if self.try_calibrate(reading) {
            debug!("Remote control: calibration");
            self.fire(reading, now, Duration::ZERO);
            *leds = Some(LedCommand::Set {
                pattern: LedPattern::Corners,
            });
            return Some(Command::CalibrationRemote);
        }
        None
    }

    /// All regular pieces home, the middle ranks empty and spare pieces on d6 and d3
    fn try_calibrate(&mut self, reading: &Reading) -> bool {
        let rows = reading.missing_rows();
        let every_other = |i: usize| row(&rows, i).chars().step_by(2).collect::<String>();
        let pattern = [0, 1, 6, 7].iter().all(|&i| {
            let r = row(&rows, i);
            r.len() == 8 && !r.chars().any(|c| c.is_ascii_digit())
        }) && row(&rows, 3) == "8"
            && row(&rows, 4) == "8"
            && every_other(2) == "34"
            && every_other(5) == "34";
        if !pattern {
            self.can_calibrate = true;
            return false;
        }
        if !self.can_calibrate {
            return false;
        }
        self.can_calibrate = false;
        true
    }

    fn new_game(
        &mut self,
        reading: &Reading,
        session: &Session,
        now: Instant,
        leds: &mut Option<LedCommand>,
    ) -> Option<Command> {
        if self.quiet(now) {
            *leds = Some(if self.start_pending {
                LedCommand::Flash {
                    pattern: LedPattern::Corners,
                }
            } else {
                LedCommand::Set {
                    pattern: LedPattern::Corners,
                }
            });
            return None;
        }

        if self.start_pending {
            let kings = reading.layout.contains('k') && reading.layout.contains('K');
            if !session.use_board_position || kings {
                debug!("Remote control: start");
                self.start_pending = false;
                self.fire(reading, now, Duration::ZERO);
                return Some(Command::Start);
            }
            // Keep blinking until both kings are back
            self.quiet_until = Some(now + self.cooldown);
            return None;
        }

        *leds = Some(LedCommand::Off);
        if self.is_latched(reading) {
            return None;
        }

        let rows = reading.rows();
        let static_rows = [0, 1, 6, 7].map(|i| row(&rows, i)).join("/");
        let changes = if static_rows == HOME_ROWS {
            if queen_dial(&rows, 3) == 5 && queen_dial(&rows, 4) == 5 {
                self.start_pending = true;
                let extra = if session.use_board_position {
                    debug!("Starting game once both kings are placed");
                    BOARD_SETUP.saturating_sub(self.cooldown)
                } else {
                    debug!("Starting game");
                    Duration::ZERO
                };
                self.fire(reading, now, extra);
                return None;
            }
            let dial_rows: Vec<usize> = (2..=5).filter(|&i| row(&rows, i) != "8").collect();
            let [i] = dial_rows[..] else {
                if dial_rows.len() > 1 {
                    debug!("Ambiguous dial reading, ignored");
                }
                return None;
            };
            let dial = row(&rows, i);
            if dial.chars().any(|c| c.is_ascii_alphabetic() && c != 'q' && c != 'Q') {
                debug!("Unexpected piece on dial row {}, ignored", i);
                return None;
            }
            match i {
                5 => colour_and_book(dial, session),
                4 => position_and_time(dial),
                3 => {
                    let depth = (row_0_to_71(dial) + 1).min(session.max_depth.max(1) as usize);
                    vec![SettingChange::EngineDepth(depth as u8)]
                }
                _ => {
                    let engine = session
                        .catalog
                        .engines
                        .get(row_0_to_71(dial))
                        .cloned()
                        .unwrap_or_else(|| "stockfish".to_string());
                    vec![SettingChange::EngineName(engine)]
                }
            }
        } else if KINGS_OUT_ROWS.contains(&static_rows.as_str()) {
            custom_time(&rows)
        } else {
            return None;
        };

        let changes: Vec<SettingChange> = collapse(changes)
            .into_iter()
            .filter(|c| session.would_change(c))
            .collect();
        if changes.is_empty() {
            return None;
        }
        self.fire(reading, now, Duration::ZERO);
        Some(Command::Configure(changes))
    }

    fn game(&mut self, state: GameState, reading: &Reading, session: &Session, now: Instant) -> Option<Command> {
        let rows = reading.rows();
        let exit = kings_in_exit_position(&rows, ExitKind::Game);
        if self.try_exit(ExitKind::Game, exit, now) {
            self.fire(reading, now, Duration::ZERO);
            return Some(Command::NewGame);
        }
        if self.quiet(now) || self.is_latched(reading) {
            return None;
        }

        let board = &session.board;
        let physical = reading.oriented(session.rotate180);
        if physical == board.placement() {
            return None;
        }

        if state == GameState::GameWaitingAiMove {
            for color in [Color::White, Color::Black] {
                if placement_without(board, &[board.king_square(color)]) == physical {
                    debug!("Force move recognized");
                    self.fire(reading, now, Duration::ZERO);
                    return Some(Command::ForceMove);
                }
            }
        }

        if !session.human_game {
            let kings: [Square; 2] = [board.king_square(Color::White), board.king_square(Color::Black)];
            if placement_without(board, &kings) == physical {
                debug!("Implicit hint request recognized");
                self.fire(reading, now, HINT_QUIET);
                return Some(Command::Hint);
            }
        }
        None
    }
}

/// Rank 3: colour, board orientation and opening book
fn colour_and_book(dial: &str, session: &Session) -> Vec<SettingChange> {
    let mut changes = Vec::new();
    let mut chars = dial.chars();
    let first = chars.next();
    let second = chars.next();
    match first {
        Some('Q') => changes.push(SettingChange::PlayWhite(true)),
        Some('q') => changes.push(SettingChange::PlayWhite(false)),
        _ => {}
    }
    match dial.to_ascii_lowercase().as_str() {
        "qq6" | "1q6" => changes.push(SettingChange::Rotate180(false)),
        "q1q5" | "2q5" => changes.push(SettingChange::Rotate180(true)),
        "3q4" => debug!("Chess960 is not supported"),
        _ => {}
    }
    if let (Some(gap @ '4'..='7'), Some('Q' | 'q')) = (first, second) {
        if dial.contains('Q') && dial.contains('q') {
            changes.push(SettingChange::Book(String::new()));
        } else {
            let mut offset = gap as usize - '4' as usize;
            if dial.contains('q') {
                offset += 4;
            }
            let book = session.catalog.books.get(offset).cloned().unwrap_or_default();
            changes.push(SettingChange::Book(book));
        }
    }
    changes
}

/// Rank 4: board position, side to move and time presets
fn position_and_time(dial: &str) -> Vec<SettingChange> {
    let mut changes = Vec::new();
    let first = dial.chars().next();
    match first {
        Some('Q') => {
            changes.push(SettingChange::UseBoardPosition(false));
            changes.push(SettingChange::SideToMove(Side::White));
        }
        Some('q') => changes.push(SettingChange::UseBoardPosition(true)),
        _ => {}
    }
    match dial.to_ascii_lowercase().as_str() {
        "qq6" | "1q6" => changes.push(SettingChange::SideToMove(Side::White)),
        "q1q5" | "2q5" => changes.push(SettingChange::SideToMove(Side::Black)),
        _ => {
            const PRESETS: [TimeControl; 5] = [
                TimeControl::Classical,
                TimeControl::Rapid,
                TimeControl::Blitz,
                TimeControl::Unlimited,
                TimeControl::Custom,
            ];
            if let Some(gap) = first.and_then(|c| c.to_digit(10)) {
                if let Some(tc) = 7usize.checked_sub(gap as usize).and_then(|i| PRESETS.get(i)) {
                    changes.push(SettingChange::TimeControl(*tc));
                }
            }
        }
    }
    changes
}

/// Kings off their squares: the white king dials minutes, the black king increment seconds
fn custom_time(rows: &[&str]) -> Vec<SettingChange> {
    let dial = |king: char| -> (Option<u32>, bool) {
        let at = |i: usize| row_0_to_8(row(rows, i), king, false) as u32;
        let mut value = None;
        let mut unlimited = false;
        match at(5) {
            0 => {}
            1 if king == 'K' => unlimited = true,
            p => value = Some(p - 1),
        }
        if at(4) > 0 {
            value = Some(at(4) + 7);
        }
        if at(3) > 0 {
            value = Some(at(3) * 2 + 14);
        }
        match at(2) {
            0 => {}
            8 => value = Some(120),
            p => value = Some(p * 10 + 30),
        }
        (value, unlimited)
    };
    let (minutes, unlimited) = dial('K');
    let (seconds, _) = dial('k');

    let mut changes = Vec::new();
    if minutes.is_some() || seconds.is_some() {
        changes.push(SettingChange::TimeControl(TimeControl::Custom));
        if let Some(m) = minutes {
            changes.push(SettingChange::TimeTotalMinutes(m));
        }
        if let Some(s) = seconds {
            changes.push(SettingChange::TimeIncrementSeconds(s));
        }
    } else if unlimited {
        changes.push(SettingChange::TimeControl(TimeControl::Unlimited));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::VirtualBoard;
    use crate::models::{BoardSettings, GameSettings};

    fn reading(layout: &str) -> Reading {
        Reading::new(layout, layout, false).unwrap()
    }

    fn session() -> Session {
        Session::new(GameSettings::default(), BoardSettings::default())
    }

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    const NEW_GAME: &str = "rnb1kbnr/pppppppp/8/3q4/3Q4/8/PPPPPPPP/RNB1KBNR";

    #[test]
    fn test_commands_inside_cooldown_are_suppressed() {
        let mut decoder = CommandDecoder::new(true);
        let s = session();
        let t0 = Instant::now();
        let first = decoder.decode(GameState::Home, &reading(NEW_GAME), &s, t0);
        assert_eq!(first.command, Some(Command::NewGame));

        // A different layout with the same meaning, one second later
        let shifted = "rnb1kbnr/pppppppp/8/3q4/3Q4/8/PPPPPPPP/RNB1KBN1";
        let again = decoder.decode(GameState::Home, &reading(shifted), &s, secs(t0, 1));
        assert_eq!(again.command, None);
        let later = decoder.decode(GameState::Home, &reading(shifted), &s, secs(t0, 4));
        assert_eq!(later.command, Some(Command::NewGame));
    }

    #[test]
    fn test_exit_needs_sustained_pattern_and_restarts_after_abort() {
        let mut decoder = CommandDecoder::new(true);
        let s = session();
        let exit = reading("8/8/8/3k4/3K4/8/8/8");
        let away = reading("8/8/8/3k4/8/3K4/8/8");
        let t0 = Instant::now();

        assert!(!decoder.decode(GameState::Home, &exit, &s, t0).exit_application);
        assert!(decoder.exit_pending());
        assert!(!decoder.decode(GameState::Home, &exit, &s, secs(t0, 4)).exit_application);
        assert!(!decoder.decode(GameState::Home, &away, &s, secs(t0, 5)).exit_application);
        assert!(!decoder.exit_pending());

        // The timer starts over instead of resuming
        assert!(!decoder.decode(GameState::Home, &exit, &s, secs(t0, 6)).exit_application);
        assert!(!decoder.decode(GameState::Home, &exit, &s, secs(t0, 10)).exit_application);
        assert!(decoder.decode(GameState::Home, &exit, &s, secs(t0, 11)).exit_application);
    }

    #[test]
    fn test_dial_rows_change_settings() {
        let mut decoder = CommandDecoder::new(true);
        let mut s = session();
        s.catalog.engines = vec!["alpha".to_string(), "beta".to_string()];
        let t0 = Instant::now();

        // Black queen on a3: play black
        let colour = reading("rnbqkbnr/pppppppp/8/8/8/q7/PPPPPPPP/RNBQKBNR");
        let decoded = decoder.decode(GameState::NewGame, &colour, &s, t0);
        assert_eq!(
            decoded.command,
            Some(Command::Configure(vec![SettingChange::PlayWhite(false)]))
        );

        // White queen on b6: second engine
        let engine = reading("rnbqkbnr/pppppppp/1Q6/8/8/8/PPPPPPPP/RNBQKBNR");
        let decoded = decoder.decode(GameState::NewGame, &engine, &s, secs(t0, 4));
        assert_eq!(
            decoded.command,
            Some(Command::Configure(vec![SettingChange::EngineName("beta".to_string())]))
        );
        s.change_setting(SettingChange::EngineName("beta".to_string()));

        // Queen on g4: rapid
        let time = reading("rnbqkbnr/pppppppp/8/8/6Q1/8/PPPPPPPP/RNBQKBNR");
        let decoded = decoder.decode(GameState::NewGame, &time, &s, secs(t0, 8));
        assert_eq!(
            decoded.command,
            Some(Command::Configure(vec![SettingChange::TimeControl(TimeControl::Rapid)]))
        );
    }

    #[test]
    fn test_pieces_on_two_dial_rows_are_ambiguous() {
        let mut decoder = CommandDecoder::new(true);
        let s = session();
        let both = reading("rnbqkbnr/pppppppp/1Q6/8/8/q7/PPPPPPPP/RNBQKBNR");
        let decoded = decoder.decode(GameState::NewGame, &both, &s, Instant::now());
        assert_eq!(decoded.command, None);
    }

    #[test]
    fn test_kings_dial_custom_time() {
        let mut decoder = CommandDecoder::new(true);
        let s = session();
        // White king on c4 (10 minutes), black king on e3 (4 seconds)
        let layout = reading("rnbq1bnr/pppppppp/8/8/2K5/4k3/PPPPPPPP/RNBQ1BNR");
        let decoded = decoder.decode(GameState::NewGame, &layout, &s, Instant::now());
        assert_eq!(
            decoded.command,
            Some(Command::Configure(vec![
                SettingChange::TimeControl(TimeControl::Custom),
                SettingChange::TimeTotalMinutes(10),
                SettingChange::TimeIncrementSeconds(4),
            ]))
        );
    }

    #[test]
    fn test_start_waits_for_kings_when_using_board_position() {
        let mut decoder = CommandDecoder::new(true);
        let mut s = session();
        s.use_board_position = true;
        let t0 = Instant::now();
        let start = reading("rnbqkbnr/pppppppp/8/4q3/4Q3/8/PPPPPPPP/RNBQKBNR");
        assert_eq!(decoder.decode(GameState::NewGame, &start, &s, t0).command, None);

        let setting_up = reading("8/8/8/8/8/8/8/8");
        let blinking = decoder.decode(GameState::NewGame, &setting_up, &s, secs(t0, 10));
        assert_eq!(blinking.command, None);
        assert_eq!(
            blinking.leds,
            Some(LedCommand::Flash {
                pattern: LedPattern::Corners
            })
        );
        assert_eq!(decoder.decode(GameState::NewGame, &setting_up, &s, secs(t0, 21)).command, None);

        let ready = reading("4k3/8/8/8/8/8/8/4K3");
        assert_eq!(
            decoder.decode(GameState::NewGame, &ready, &s, secs(t0, 25)).command,
            Some(Command::Start)
        );
    }

    #[test]
    fn test_force_move_and_hint_in_game() {
        let mut decoder = CommandDecoder::new(true);
        let mut s = session();
        s.board = VirtualBoard::new();
        s.board.push_uci("e2e4").unwrap();
        let t0 = Instant::now();

        let no_black_king = reading("rnbq1bnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR");
        assert_eq!(
            decoder.decode(GameState::GameWaitingAiMove, &no_black_king, &s, t0).command,
            Some(Command::ForceMove)
        );

        let no_kings = reading("rnbq1bnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQ1BNR");
        assert_eq!(
            decoder.decode(GameState::GameWaitingUserMove, &no_kings, &s, secs(t0, 4)).command,
            Some(Command::Hint)
        );
        s.human_game = true;
        let other = reading("rnbq1bnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQ1BN1");
        assert_eq!(
            decoder.decode(GameState::GameWaitingUserMove, &other, &s, secs(t0, 10)).command,
            None
        );
    }

    #[test]
    fn test_calibration_pattern_fires_once() {
        let mut decoder = CommandDecoder::new(true);
        let s = session();
        let pattern = reading("rnbqkbnr/pppppppp/3q4/8/8/3Q4/PPPPPPPP/RNBQKBNR");
        let t0 = Instant::now();
        assert_eq!(
            decoder.decode(GameState::Home, &pattern, &s, t0).command,
            Some(Command::CalibrationRemote)
        );
        assert_eq!(decoder.decode(GameState::Home, &pattern, &s, secs(t0, 10)).command, None);
    }

    #[test]
    fn test_switched_off_decoder_is_silent() {
        let mut decoder = CommandDecoder::new(false);
        let decoded = decoder.decode(GameState::Home, &reading(NEW_GAME), &session(), Instant::now());
        assert_eq!(decoded, Decoded::default());
    }
}
