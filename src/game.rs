//! One game between two engines: the protocol dialogue, time control,
//! adjudication, and the exported artifacts (PGN, SGF, samples).

use anyhow::Result;
use tracing::info;

use crate::engine::{Engine, MoveInfo};
use crate::jobs::Outcome;
use crate::options::{EngineOptions, Options};
use crate::position::{Color, GameRule, Move, Position, Transform};
use crate::sample::Sample;
use crate::util::prngf;
use crate::worker::Worker;

/// Why a game ended. Everything before [`TerminalState::Separator`] is a loss
/// by the side to move at game end; everything after is a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TerminalState {
    None,
    FiveConnect,
    TimeLoss,
    Crashed,
    IllegalMove,
    ForbiddenMove,
    Resign,
    Separator,
    InsufficientSpace,
    DrawAdjudication,
}

/// Transient record of a single game.
pub struct Game {
    pub round: usize,
    pub game: usize,
    /// Player names indexed by color.
    pub names: [String; 2],
    /// Position after each applied move; `pos[0]` is the opening.
    pub pos: Vec<Position>,
    /// Engine-reported info per solicited move.
    pub info: Vec<MoveInfo>,
    pub samples: Vec<Sample>,
    pub state: TerminalState,
    rule: GameRule,
    board_size: usize,
    /// Moves applied after the opening.
    ply: usize,
}

impl Game {
    pub fn new(round: usize, game: usize) -> Game {
        Game {
            round,
            game,
            names: [String::new(), String::new()],
            pos: Vec::new(),
            info: Vec::new(),
            samples: Vec::new(),
            state: TerminalState::None,
            rule: GameRule::FiveOrMore,
            board_size: 0,
            ply: 0,
        }
    }

    /// Set up the starting position from an opening line, optionally
    /// transformed by the opening cycle round. Returns the color to move, or
    /// `None` for an unusable opening.
    pub fn load_opening(
        &mut self,
        opening: &str,
        options: &Options,
        cycle_round: usize,
    ) -> Option<Color> {
        let mut pos = Position::new(options.board_size);
        if !pos.apply_opening(opening, options.opening_format) {
            return None;
        }
        if options.transform {
            pos.transform(Transform::from_index(cycle_round));
        }
        let color = pos.turn();
        self.pos.push(pos);
        Some(color)
    }

    /// Play the game to a terminal state.
    ///
    /// `engines[reverse as usize]` moves first (which color that is depends
    /// on the opening). Returns the result from `engines[0]`'s viewpoint.
    /// Only a fatal configuration failure (see `--fatalerror`) is an `Err`.
    pub fn play(
        &mut self,
        worker: &mut Worker,
        options: &Options,
        engines: &mut [Engine; 2],
        eo: [&EngineOptions; 2],
        reverse: bool,
        mut messages: Option<&mut String>,
    ) -> Result<Outcome> {
        self.rule = options.rule;
        self.board_size = options.board_size;

        let first_mover = self.pos[0].turn();
        for color in [Color::Black, Color::White] {
            let seat = color.index() ^ first_mover.index() ^ reverse as usize;
            self.names[color.index()] = engines[seat].name.clone();
        }

        for i in 0..2 {
            engines[i].write_line(&format!("START {}", options.board_size));
            // A refused or missed START leaves the engine down; its first
            // move solicitation then ends the game against it, which keeps
            // seat attribution right for either seat.
            engines[i].wait_for_ok(options.fatal_error)?;
            game_info_commands(eo[i], options, &mut engines[i]);
        }

        let mut played: Option<Move> = None;
        let mut draw_ply_count = 0u32;
        let mut resign_count = [0u32; 2];
        // seat to move
        let mut ei = reverse as usize;
        let mut time_left = [eo[0].timeout_match, eo[1].timeout_match];
        let mut can_use_turn = [false, false];

        loop {
            if let Some(mv) = played {
                let mut next = self.pos[self.ply].clone();
                next.play(mv);
                self.pos.push(next);
                self.ply += 1;
            }

            if options.debug {
                println!("{}", self.pos[self.ply]);
            }

            // A long run only wins where the rule allows it; under renju a
            // black six is not a win (it is forbidden instead).
            let allow_long = match self.rule {
                GameRule::FiveOrMore => true,
                GameRule::ExactFive => false,
                GameRule::Renju => played.map(Move::color) != Some(Color::Black),
            };
            self.state = {
                let current = &mut self.pos[self.ply];
                if current.check_five_in_line_lastmove(allow_long) {
                    TerminalState::FiveConnect
                } else if current.moves_left() == 0 {
                    TerminalState::InsufficientSpace
                } else {
                    TerminalState::None
                }
            };
            if self.state != TerminalState::None {
                break;
            }
            if options.force_draw_after > 0
                && self.pos[self.ply].move_count() >= options.force_draw_after
            {
                self.state = TerminalState::DrawAdjudication;
                break;
            }

            compute_time_left(eo[ei], &mut time_left[ei]);
            engines[ei].write_line(&format!("INFO time_left {}", time_left[ei]));

            // Solicit the move: BEGIN on an empty board, TURN when the
            // engine has a synchronized board, BOARD otherwise.
            if self.pos[self.ply].move_count() == 0 {
                engines[ei].write_line("BEGIN");
                can_use_turn[ei] = true;
            } else if let Some(last) = played.filter(|_| options.use_turn && can_use_turn[ei]) {
                engines[ei].write_line(&format!("TURN {}", Position::move_to_str(last)));
            } else {
                send_board_commands(&self.pos[self.ply], &mut engines[ei]);
                can_use_turn[ei] = true;
            }

            let mut move_info = MoveInfo::default();
            let best = engines[ei].bestmove(
                &mut time_left[ei],
                eo[ei].timeout_turn,
                &mut move_info,
                self.pos[self.ply].move_count() + 1,
                messages.as_mut().map(|m| &mut **m),
            );
            self.info.push(move_info);

            let Some(best) = best else {
                info!(
                    worker = worker.id,
                    engine = %engines[ei].name,
                    "engine crashed at {} moves after opening",
                    self.ply
                );
                self.state = TerminalState::Crashed;
                break;
            };

            let timed = eo[ei].timeout_turn > 0 || eo[ei].timeout_match > 0 || eo[ei].increment > 0;
            if timed && time_left[ei] < 0 {
                info!(
                    worker = worker.id,
                    engine = %engines[ei].name,
                    "engine timed out at {} moves after opening",
                    self.ply
                );
                self.state = TerminalState::TimeLoss;
                break;
            }

            let current = &self.pos[self.ply];
            let mv = match current.move_from_str(&best) {
                Some(mv) if current.is_legal_move(mv) => mv,
                _ => {
                    info!(
                        worker = worker.id,
                        engine = %engines[ei].name,
                        "engine played illegal move at {} moves after opening: {best}",
                        self.ply
                    );
                    self.state = TerminalState::IllegalMove;
                    break;
                }
            };

            if self.rule == GameRule::Renju && current.is_forbidden_move(mv) {
                self.state = TerminalState::ForbiddenMove;
                break;
            }

            if options.draw_count > 0 && move_info.score.abs() <= options.draw_score {
                draw_ply_count += 1;
                if draw_ply_count >= 2 * options.draw_count {
                    self.state = TerminalState::DrawAdjudication;
                    break;
                }
            } else {
                draw_ply_count = 0;
            }

            if options.resign_count > 0 && move_info.score <= -options.resign_score {
                resign_count[ei] += 1;
                if resign_count[ei] >= options.resign_count {
                    self.state = TerminalState::Resign;
                    break;
                }
            } else {
                resign_count[ei] = 0;
            }

            if let Some(sp) = &options.sample {
                if prngf(&mut worker.seed) <= sp.freq {
                    self.samples.push(Sample {
                        pos: current.clone(),
                        mv,
                        // placeholder, back-filled when the game ends
                        result: 1,
                    });
                }
            }

            played = Some(mv);
            ei = 1 - ei;
        }

        debug_assert_ne!(self.state, TerminalState::None);

        // Back-fill sample results from each sample's side-to-move viewpoint.
        // Games decided by misbehavior say nothing about position quality.
        if matches!(
            self.state,
            TerminalState::TimeLoss | TerminalState::Crashed | TerminalState::IllegalMove
        ) {
            self.samples.clear();
        } else {
            let black_pov: u8 = if self.state < TerminalState::Separator {
                if self.pos[self.ply].turn() == Color::Black {
                    0
                } else {
                    2
                }
            } else {
                1
            };
            for sample in &mut self.samples {
                sample.result = if sample.pos.turn() == Color::Black {
                    black_pov
                } else {
                    2 - black_pov
                };
            }
        }

        Ok(if self.state < TerminalState::Separator {
            // the seat on the move has lost
            if ei == 0 {
                Outcome::Loss
            } else {
                Outcome::Win
            }
        } else {
            Outcome::Draw
        })
    }

    /// Decode the terminal state into result text and a termination reason.
    /// `result_txt` is indexed by black's outcome: `[loss, draw, win]`.
    pub fn decode_state(&self, result_txt: [&str; 3]) -> (String, String) {
        let black_turn = self.pos[self.ply].turn() == Color::Black;
        let loser_result = if black_turn { result_txt[0] } else { result_txt[2] };
        let winner_color = if black_turn { "White" } else { "Black" };

        let (result, reason) = match self.state {
            TerminalState::None => ("*", "Unterminated".to_string()),
            TerminalState::FiveConnect => {
                (loser_result, format!("{winner_color} win by five connection"))
            }
            TerminalState::TimeLoss => {
                (loser_result, format!("{winner_color} win by time forfeit"))
            }
            TerminalState::Crashed => {
                (loser_result, format!("{winner_color} win by opponent crash"))
            }
            TerminalState::IllegalMove => (
                loser_result,
                format!("{winner_color} win by opponent illegal move"),
            ),
            TerminalState::ForbiddenMove => (
                result_txt[0],
                "Black play on forbidden position".to_string(),
            ),
            TerminalState::Resign => {
                (loser_result, format!("{winner_color} win by adjudication"))
            }
            TerminalState::InsufficientSpace => {
                (result_txt[1], "Draw by fullfilled board".to_string())
            }
            TerminalState::DrawAdjudication => {
                (result_txt[1], "Draw by adjudication".to_string())
            }
            TerminalState::Separator => unreachable!("separator is not a terminal state"),
        };
        (result.to_string(), reason)
    }

    /// PGN export: tag pairs and, with `verbosity > 0`, the move list.
    pub fn export_pgn(&self, game_idx: usize, verbosity: u32) -> String {
        let mut out = format!("[Event \"{game_idx}\"]\n");
        out.push_str(&format!("[Date \"{}\"]\n", timestamp()));
        out.push_str(&format!("[Round \"{}.{}\"]\n", self.round + 1, self.game + 1));
        out.push_str(&format!("[Black \"{}\"]\n", self.names[Color::Black.index()]));
        out.push_str(&format!("[White \"{}\"]\n", self.names[Color::White.index()]));

        // from white's viewpoint, chess convention
        let (result, reason) = self.decode_state(["1-0", "1/2-1/2", "0-1"]);
        out.push_str(&format!("[Result \"{result}\"]\n"));
        out.push_str(&format!("[Termination \"{reason}\"]\n"));
        out.push_str(&format!("[PlyCount \"{}\"]\n", self.ply));

        if verbosity > 0 {
            out.push('\n');
            let last = &self.pos[self.ply];
            for (i, mv) in last.history().iter().enumerate() {
                if i % 2 == 0 {
                    out.push_str(&format!("{}. ", i / 2 + 1));
                }
                out.push_str(&Position::move_to_str(*mv));
                out.push(' ');
            }
        }
        out.push_str(&result);
        out.push_str("\n\n");
        out
    }

    /// SGF export with per-move elapsed-time comments.
    pub fn export_sgf(&self, game_idx: usize) -> String {
        const MOVES_PER_LINE: usize = 8;

        let black = &self.names[Color::Black.index()];
        let white = &self.names[Color::White.index()];
        let mut out = String::from("(;FF[4]GM[4]");
        out.push_str(&format!("GN[{game_idx}]"));
        out.push_str(&format!("EV[{black} x {white}]"));
        out.push_str(&format!("DT[{}]", timestamp()));
        out.push_str(&format!("RO[{}.{}]", self.round + 1, self.game + 1));
        out.push_str(&format!("RU[{}]", self.rule.code()));
        out.push_str(&format!("SZ[{}]", self.board_size));
        out.push_str(&format!("PB[{black}]"));
        out.push_str(&format!("PW[{white}]"));
        let (result, reason) = self.decode_state(["W+1", "0", "B+1"]);
        out.push_str(&format!("RE[{result}]"));
        out.push_str(&format!("TE[{reason}]"));
        out.push('\n');

        let last = &self.pos[self.ply];
        let opening_moves = last.move_count() - self.ply;
        let mut on_line = 0;
        for (j, mv) in last.history().iter().enumerate() {
            if opening_moves > 0 && j == opening_moves {
                out.push('\n');
            }
            if on_line >= MOVES_PER_LINE {
                out.push('\n');
                on_line = 0;
            }
            out.push(';');
            let side = match mv.color() {
                Color::Black => 'B',
                Color::White => 'W',
            };
            let col = (b'a' + mv.x() as u8) as char;
            let row = (b'a' + mv.y() as u8) as char;
            out.push_str(&format!("{side}[{col}{row}]"));
            if j < opening_moves {
                out.push_str("C[opening move]");
            } else {
                out.push_str(&format!("C[{}ms]", self.info[j - opening_moves].time));
                on_line += 1;
            }
        }
        out.push_str(")\n\n");
        out
    }
}

/// Current wall-clock time as `YYYY.MM.DD HH:MM:SS`.
fn timestamp() -> String {
    let format = time::format_description::parse(
        "[year].[month].[day] [hour]:[minute]:[second]",
    )
    .expect("static format");
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(&format)
        .unwrap_or_default()
}

/// New-game preamble: rule and limits, then the custom key/value options.
fn game_info_commands(eo: &EngineOptions, options: &Options, engine: &mut Engine) {
    engine.write_line(&format!("INFO rule {}", options.rule.code()));
    if eo.timeout_turn > 0 {
        engine.write_line(&format!("INFO timeout_turn {}", eo.timeout_turn));
    }
    // always sent: 0 tells the engine there is no match limit
    engine.write_line(&format!("INFO timeout_match {}", eo.timeout_match));
    if eo.depth > 0 {
        engine.write_line(&format!("INFO max_depth {}", eo.depth));
    }
    if eo.nodes > 0 {
        engine.write_line(&format!("INFO max_node {}", eo.nodes));
    }
    engine.write_line(&format!("INFO max_memory {}", eo.max_memory));
    if eo.num_threads > 1 {
        engine.write_line(&format!("INFO thread_num {}", eo.num_threads));
    }
    for (key, value) in &eo.options {
        engine.write_line(&format!("INFO {key} {value}"));
    }
}

/// Full board resync. Per the protocol the side that moved last is stone
/// index 2, the other side 1, regardless of color.
fn send_board_commands(pos: &Position, engine: &mut Engine) {
    engine.write_line("BOARD");
    let last_color = pos
        .history()
        .last()
        .map(|mv| mv.color())
        .expect("BOARD requires at least one stone");
    for mv in pos.history() {
        let idx = if mv.color() == last_color { 2 } else { 1 };
        engine.write_line(&format!("{},{},{idx}", mv.x(), mv.y()));
    }
    engine.write_line("DONE");
}

/// Refresh a seat's remaining match time before its turn: apply the
/// per-move increment under a match clock, or grant effectively unlimited
/// time when no match clock is configured.
fn compute_time_left(eo: &EngineOptions, time_left: &mut i64) {
    if eo.timeout_match > 0 {
        if eo.increment > 0 {
            *time_left += eo.increment;
        }
    } else {
        *time_left = 2_147_483_647;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn game_with_state(state: TerminalState, moves: &[(i32, i32)]) -> Game {
        let mut game = Game::new(0, 0);
        let options = Options::default();
        game.load_opening("", &options, 0).unwrap();
        game.board_size = options.board_size;
        game.names = ["Alpha".into(), "Beta".into()];
        for &(x, y) in moves {
            let mut next = game.pos[game.ply].clone();
            let mv = Move::new(x, y, next.turn());
            next.play(mv);
            game.pos.push(next);
            game.ply += 1;
            game.info.push(MoveInfo {
                score: 0,
                depth: 0,
                time: 5,
            });
        }
        game.state = state;
        game
    }

    #[test]
    fn decode_win_by_five() {
        // black made the last move, so white is to move and has lost
        let game = game_with_state(TerminalState::FiveConnect, &[(0, 0), (1, 1), (2, 0)]);
        let (result, reason) = game.decode_state(["0-1", "1/2-1/2", "1-0"]);
        assert_eq!(result, "1-0");
        assert_eq!(reason, "Black win by five connection");
    }

    #[test]
    fn decode_draw() {
        let game = game_with_state(TerminalState::DrawAdjudication, &[(0, 0), (1, 1)]);
        let (result, reason) = game.decode_state(["0-1", "1/2-1/2", "1-0"]);
        assert_eq!(result, "1/2-1/2");
        assert_eq!(reason, "Draw by adjudication");
    }

    #[test]
    fn decode_forbidden_always_blames_black() {
        let game = game_with_state(TerminalState::ForbiddenMove, &[(0, 0), (1, 1)]);
        let (result, reason) = game.decode_state(["0-1", "1/2-1/2", "1-0"]);
        assert_eq!(result, "0-1");
        assert_eq!(reason, "Black play on forbidden position");
    }

    #[test]
    fn pgn_export_frames_headers() {
        let game = game_with_state(TerminalState::TimeLoss, &[(0, 0), (1, 1), (2, 0)]);
        let pgn = game.export_pgn(7, 0);
        assert!(pgn.starts_with("[Event \"7\"]\n"));
        assert!(pgn.contains("[Round \"1.1\"]\n"));
        assert!(pgn.contains("[Black \"Alpha\"]\n"));
        assert!(pgn.contains("[White \"Beta\"]\n"));
        assert!(pgn.contains("[Result \"1-0\"]\n"));
        assert!(pgn.contains("[Termination \"Black win by time forfeit\"]\n"));
        assert!(pgn.contains("[PlyCount \"3\"]\n"));
        assert!(pgn.ends_with("1-0\n\n"));
    }

    #[test]
    fn pgn_verbose_lists_moves() {
        let game = game_with_state(TerminalState::FiveConnect, &[(0, 0), (1, 1), (2, 0)]);
        let pgn = game.export_pgn(1, 1);
        assert!(pgn.contains("1. 0,0 1,1 2. 2,0"));
    }

    #[test]
    fn sgf_export_frames_moves_and_times() {
        let game = game_with_state(TerminalState::FiveConnect, &[(0, 0), (1, 1)]);
        let sgf = game.export_sgf(3);
        assert!(sgf.starts_with("(;FF[4]GM[4]GN[3]EV[Alpha x Beta]"));
        assert!(sgf.contains("SZ[15]"));
        assert!(sgf.contains("RE[B+1]"));
        assert!(sgf.contains(";B[aa]C[5ms]"));
        assert!(sgf.contains(";W[bb]C[5ms]"));
        assert!(sgf.ends_with(")\n\n"));
    }

    #[test]
    fn sgf_marks_opening_moves() {
        let mut game = Game::new(0, 0);
        let mut options = Options::default();
        options.board_size = 15;
        game.load_opening("0,0, 1,1", &options, 0).unwrap();
        game.board_size = options.board_size;
        game.names = ["Alpha".into(), "Beta".into()];
        let mut next = game.pos[0].clone();
        next.play(Move::new(9, 9, next.turn()));
        game.pos.push(next);
        game.ply = 1;
        game.info.push(MoveInfo {
            score: 0,
            depth: 0,
            time: 12,
        });
        game.state = TerminalState::DrawAdjudication;

        let sgf = game.export_sgf(1);
        assert_eq!(sgf.matches("C[opening move]").count(), 2);
        assert!(sgf.contains("C[12ms]"));
    }

    #[test]
    fn states_order_around_separator() {
        for state in [
            TerminalState::FiveConnect,
            TerminalState::TimeLoss,
            TerminalState::Crashed,
            TerminalState::IllegalMove,
            TerminalState::ForbiddenMove,
            TerminalState::Resign,
        ] {
            assert!(state < TerminalState::Separator);
        }
        for state in [
            TerminalState::InsufficientSpace,
            TerminalState::DrawAdjudication,
        ] {
            assert!(state > TerminalState::Separator);
        }
    }
}
