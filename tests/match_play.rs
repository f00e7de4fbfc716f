//! End-to-end tournaments against small shell-script agents.
//!
//! Each test writes its agents into a temp directory, runs a real tournament
//! through the public API (child processes, watchdogs, transcript writers
//! and all), and asserts on the returned standings and the files on disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use gomoku_arena::options::{EngineOptions, Options};
use gomoku_arena::position::GameRule;
use gomoku_arena::tournament::Tournament;
use tracing::Level;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_test_writer()
        .try_init();
}

fn write_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Agent that always plays the first empty cell in row-major scan order.
const LOW_CELL: &str = r#"#!/bin/sh
size=15
occ=" "
answer() {
  y=0
  while [ "$y" -lt "$size" ]; do
    x=0
    while [ "$x" -lt "$size" ]; do
      case "$occ" in
        *" $x,$y "*) ;;
        *) occ="$occ$x,$y "; echo "$x,$y"; return ;;
      esac
      x=$((x+1))
    done
    y=$((y+1))
  done
}
while read -r line; do
  case "$line" in
    ABOUT) echo 'name="lowcell", version="1.0"' ;;
    START*) size="${line#START }"; occ=" "; echo OK ;;
    BEGIN) answer ;;
    TURN*) occ="$occ${line#TURN } "; answer ;;
    BOARD)
      occ=" "
      while read -r cell; do
        [ "$cell" = DONE ] && break
        occ="$occ${cell%,*} "
      done
      answer ;;
    END) exit 0 ;;
    *) ;;
  esac
done
"#;

/// Mirror image of `LOW_CELL`: always the last empty cell in scan order.
const HIGH_CELL: &str = r#"#!/bin/sh
size=15
occ=" "
answer() {
  y=$((size-1))
  while [ "$y" -ge 0 ]; do
    x=$((size-1))
    while [ "$x" -ge 0 ]; do
      case "$occ" in
        *" $x,$y "*) ;;
        *) occ="$occ$x,$y "; echo "$x,$y"; return ;;
      esac
      x=$((x-1))
    done
    y=$((y-1))
  done
}
while read -r line; do
  case "$line" in
    ABOUT) echo 'name="highcell", version="1.0"' ;;
    START*) size="${line#START }"; occ=" "; echo OK ;;
    BEGIN) answer ;;
    TURN*) occ="$occ${line#TURN } "; answer ;;
    BOARD)
      occ=" "
      while read -r cell; do
        [ "$cell" = DONE ] && break
        occ="$occ${cell%,*} "
      done
      answer ;;
    END) exit 0 ;;
    *) ;;
  esac
done
"#;

/// Agent that answers `START` with silence until the watchdog kills it.
const HANGS_ON_START: &str = r#"#!/bin/sh
while read -r line; do
  case "$line" in
    ABOUT) echo 'name="hangs"' ;;
    END) exit 0 ;;
    *) ;;
  esac
done
"#;

/// Agent that plays a fixed move list passed as its arguments, announcing
/// each move with a MESSAGE line first.
const SCRIPTED: &str = r#"#!/bin/sh
moves="$*"
next() {
  mv="${moves%% *}"
  moves="${moves#* }"
  echo "MESSAGE playing $mv"
  echo "$mv"
}
while read -r line; do
  case "$line" in
    ABOUT) echo 'name="scripted"' ;;
    START*) echo OK ;;
    BEGIN) next ;;
    TURN*) next ;;
    BOARD)
      while read -r cell; do
        [ "$cell" = DONE ] && break
      done
      next ;;
    END) exit 0 ;;
    *) ;;
  esac
done
"#;

fn engine(path: &Path) -> EngineOptions {
    EngineOptions::parse_spec(&format!("cmd={}", path.display())).unwrap()
}

fn scripted_engine(path: &Path, moves: &str) -> EngineOptions {
    EngineOptions::parse_spec(&format!("cmd=\"{} {moves}\"", path.display())).unwrap()
}

#[test]
fn greedy_agents_split_a_two_game_match() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let low = write_agent(dir.path(), "low.sh", LOW_CELL);
    let high = write_agent(dir.path(), "high.sh", HIGH_CELL);
    let pgn_path = dir.path().join("games.pgn");

    let options = Options {
        board_size: 6,
        games: 2,
        pgn: Some(pgn_path.clone()),
        ..Options::default()
    };
    let results = Tournament::new(options, vec![engine(&low), engine(&high)])
        .unwrap()
        .run()
        .unwrap();

    // each side wins the game it moves first in, by five along its home row
    assert_eq!(results.len(), 1);
    let tally = results[0].tally;
    assert_eq!((tally.wins, tally.losses, tally.draws), (1, 1, 0));
    assert_eq!(results[0].names[0], "lowcell");
    assert_eq!(results[0].names[1], "highcell");

    let pgn = fs::read_to_string(&pgn_path).unwrap();
    assert_eq!(pgn.matches("[Event ").count(), 2);
    assert_eq!(pgn.matches("win by five connection").count(), 2);
    // at most 5 + 4 stones are needed on an empty 6x6 board
    assert!(pgn.contains("[PlyCount \"9\"]"));
}

#[test]
fn hanging_agent_loses_by_crash_and_is_respawned() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let low = write_agent(dir.path(), "low.sh", LOW_CELL);
    let hangs = write_agent(dir.path(), "hangs.sh", HANGS_ON_START);
    let pgn_path = dir.path().join("games.pgn");

    let mut hang_engine = engine(&hangs);
    hang_engine.tolerance = 500;
    let options = Options {
        board_size: 9,
        games: 2,
        pgn: Some(pgn_path.clone()),
        ..Options::default()
    };
    let results = Tournament::new(options, vec![engine(&low), hang_engine])
        .unwrap()
        .run()
        .unwrap();

    // both games score against the hanging side, which proves the second
    // game got a freshly spawned process after the first kill
    let tally = results[0].tally;
    assert_eq!((tally.wins, tally.losses, tally.draws), (2, 0, 0));

    let pgn = fs::read_to_string(&pgn_path).unwrap();
    assert_eq!(pgn.matches("win by opponent crash").count(), 2);
}

#[test]
fn out_of_range_move_is_an_illegal_move_win() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let scripted = write_agent(dir.path(), "scripted.sh", SCRIPTED);

    let options = Options {
        pgn: Some(dir.path().join("games.pgn")),
        msg: Some(dir.path().join("games.msg")),
        ..Options::default()
    };
    let black = scripted_engine(&scripted, "7,7 8,8 9,9");
    let white = scripted_engine(&scripted, "99,99 0,0");
    let results = Tournament::new(options, vec![black, white])
        .unwrap()
        .run()
        .unwrap();

    let tally = results[0].tally;
    assert_eq!((tally.wins, tally.losses, tally.draws), (1, 0, 0));

    let pgn = fs::read_to_string(dir.path().join("games.pgn")).unwrap();
    assert!(pgn.contains("Black win by opponent illegal move"));

    // engine MESSAGE chatter lands in the framed message transcript
    let msg = fs::read_to_string(dir.path().join("games.msg")).unwrap();
    assert!(msg.contains("Game ID: 1"));
    assert!(msg.contains("1) scripted: playing 7,7"));
    assert!(msg.contains("2) scripted: playing 99,99"));
}

#[test]
fn renju_double_four_forfeits_the_game_for_black() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let scripted = write_agent(dir.path(), "scripted.sh", SCRIPTED);

    let options = Options {
        rule: GameRule::Renju,
        pgn: Some(dir.path().join("games.pgn")),
        ..Options::default()
    };
    // black builds two half-open fours crossing at 7,7 and then plays it
    let black = scripted_engine(&scripted, "4,7 5,7 6,7 7,4 7,5 7,6 7,7");
    let white = scripted_engine(&scripted, "3,7 7,3 0,0 1,0 2,0 0,14");
    let results = Tournament::new(options, vec![black, white])
        .unwrap()
        .run()
        .unwrap();

    let tally = results[0].tally;
    assert_eq!((tally.wins, tally.losses, tally.draws), (0, 1, 0));

    let pgn = fs::read_to_string(dir.path().join("games.pgn")).unwrap();
    assert!(pgn.contains("Black play on forbidden position"));
    // PGN results are white-pov, so a black forfeit reads 1-0
    assert!(pgn.contains("[Result \"1-0\"]"));
}

#[test]
fn quiet_game_is_draw_adjudicated() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let low = write_agent(dir.path(), "low.sh", LOW_CELL);
    let pgn_path = dir.path().join("games.pgn");

    // both sides fill the board in the same scan order, so colors alternate
    // everywhere and no five can form; with the default inert info parser
    // every reported score is 0, so |score| <= 2 holds each ply and the
    // draw rule fires after 2 * 10 plies
    let options = Options {
        draw_count: 10,
        draw_score: 2,
        pgn: Some(pgn_path.clone()),
        ..Options::default()
    };
    let results = Tournament::new(options, vec![engine(&low), engine(&low)])
        .unwrap()
        .run()
        .unwrap();

    let tally = results[0].tally;
    assert_eq!((tally.wins, tally.losses, tally.draws), (0, 0, 1));

    let pgn = fs::read_to_string(&pgn_path).unwrap();
    assert!(pgn.contains("Draw by adjudication"));
    // the 20th move triggers the adjudication and is never applied
    assert!(pgn.contains("[PlyCount \"19\"]"));
}

#[test]
fn concurrent_games_export_in_index_order() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let low = write_agent(dir.path(), "low.sh", LOW_CELL);
    let high = write_agent(dir.path(), "high.sh", HIGH_CELL);
    let pgn_path = dir.path().join("games.pgn");

    let options = Options {
        board_size: 6,
        games: 6,
        concurrency: 3,
        pgn: Some(pgn_path.clone()),
        ..Options::default()
    };
    let results = Tournament::new(options, vec![engine(&low), engine(&high)])
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(results[0].tally.total(), 6);

    let pgn = fs::read_to_string(&pgn_path).unwrap();
    let events: Vec<usize> = pgn
        .lines()
        .filter_map(|l| l.strip_prefix("[Event \"")?.strip_suffix("\"]")?.parse().ok())
        .collect();
    assert_eq!(events, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn opening_book_and_repeat_swap_seats_on_the_same_opening() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let low = write_agent(dir.path(), "low.sh", LOW_CELL);
    let high = write_agent(dir.path(), "high.sh", HIGH_CELL);
    let book = dir.path().join("book.txt");
    // one stone for each side near the center
    fs::write(&book, "0,0, 1,1\n").unwrap();
    let sgf_path = dir.path().join("games.sgf");

    let options = Options {
        board_size: 9,
        games: 2,
        repeat: true,
        openings: Some(book),
        sgf: Some(sgf_path.clone()),
        ..Options::default()
    };
    let results = Tournament::new(options, vec![engine(&low), engine(&high)])
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(results[0].tally.total(), 2);

    let sgf = fs::read_to_string(&sgf_path).unwrap();
    // two games, each carrying the two opening stones
    assert_eq!(sgf.matches("C[opening move]").count(), 4);
    // seats swapped: each engine took black once
    assert!(sgf.contains("PB[lowcell]"));
    assert!(sgf.contains("PB[highcell]"));
}
