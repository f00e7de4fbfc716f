//! Board state and game rules for gomoku and renju.
//!
//! The board lives in a fixed 32×32 array with a 5-cell wall margin on every
//! side, so line scans never need bounds checks: walking five cells in any
//! direction from a playable cell stays inside the array. A cell coordinate
//! packs into a [`Pos`] as `(x+5) << 5 | (y+5)`, and a [`Move`] adds the stone
//! color in bit 10. The playable extent is limited to 22×22 by the margin.

use std::fmt;
use std::sync::OnceLock;

use crate::util::prng;

pub const MAX_BOARD_SIZE_BIT: u32 = 5;
pub const MAX_BOARD_SIZE: usize = 1 << MAX_BOARD_SIZE_BIT;
pub const MAX_BOARD_SQR: usize = MAX_BOARD_SIZE * MAX_BOARD_SIZE;
pub const BOARD_BOUNDARY: i32 = 5;
/// Largest playable board extent (32 minus two margins).
pub const MAX_REAL_BOARD_SIZE: usize = MAX_BOARD_SIZE - 2 * BOARD_BOUNDARY as usize;

/// Index into the padded board array.
pub type Pos = u16;

/// Step offsets for the four scan directions: horizontal, anti-diagonal,
/// vertical, diagonal.
const DIRECTION: [i32; 4] = [
    1,
    MAX_BOARD_SIZE as i32 - 1,
    MAX_BOARD_SIZE as i32,
    MAX_BOARD_SIZE as i32 + 1,
];

pub fn pos_from_xy(x: i32, y: i32) -> Pos {
    (((x + BOARD_BOUNDARY) << MAX_BOARD_SIZE_BIT) + (y + BOARD_BOUNDARY)) as Pos
}

pub fn coord_x(p: Pos) -> i32 {
    (p as i32 >> MAX_BOARD_SIZE_BIT) - BOARD_BOUNDARY
}

pub fn coord_y(p: Pos) -> i32 {
    (p as i32 & (MAX_BOARD_SIZE as i32 - 1)) - BOARD_BOUNDARY
}

/// Stone color. Black always moves first on an empty board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black = 0,
    White = 1,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Board cell contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Wall,
    Stone(Color),
}

/// A stone placement: cell plus color, packed into 16 bits. `Move::NONE` is
/// the reserved "no move yet" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move(u16);

impl Move {
    pub const NONE: Move = Move(0xFFFF);

    pub fn new(x: i32, y: i32, color: Color) -> Move {
        Move(((color as u16) << 10) | pos_from_xy(x, y))
    }

    pub fn from_pos(pos: Pos, color: Color) -> Move {
        Move(((color as u16) << 10) | pos)
    }

    pub fn pos(self) -> Pos {
        self.0 & 0x03FF
    }

    pub fn color(self) -> Color {
        if self.0 >> 10 == 0 {
            Color::Black
        } else {
            Color::White
        }
    }

    pub fn x(self) -> i32 {
        coord_x(self.pos())
    }

    pub fn y(self) -> i32 {
        coord_y(self.pos())
    }

    /// Packed 16-bit representation, as stored in binary sample records.
    pub fn raw(self) -> u16 {
        self.0
    }
}

/// Which patterns end the game: `FiveOrMore` wins on any run of ≥5,
/// `ExactFive` requires exactly 5, `Renju` adds black's forbidden moves and
/// restricts black to exact fives. Discriminants follow the Gomocup
/// `INFO rule` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameRule {
    FiveOrMore = 0,
    ExactFive = 1,
    Renju = 4,
}

impl GameRule {
    pub fn from_code(code: u32) -> Option<GameRule> {
        match code {
            0 => Some(GameRule::FiveOrMore),
            1 => Some(GameRule::ExactFive),
            4 => Some(GameRule::Renju),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Opening line encodings (see the opening file format in the README).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpeningFormat {
    /// Signed `dx,dy` offsets from the board center, pairs of stones.
    Offset,
    /// Runs of `<letter><number>`: `h8` is `(7, 7)`.
    Pos,
}

/// The eight dihedral symmetries of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipX,
    FlipY,
    FlipXy,
    FlipYx,
}

pub const NB_TRANSFORM: usize = 8;

impl Transform {
    pub fn from_index(i: usize) -> Transform {
        use Transform::*;
        match i % NB_TRANSFORM {
            0 => Identity,
            1 => Rotate90,
            2 => Rotate180,
            3 => Rotate270,
            4 => FlipX,
            5 => FlipY,
            6 => FlipXy,
            _ => FlipYx,
        }
    }

    pub fn inverse(self) -> Transform {
        use Transform::*;
        match self {
            Rotate90 => Rotate270,
            Rotate270 => Rotate90,
            t => t,
        }
    }

    fn apply(self, x: i32, y: i32, s: i32) -> (i32, i32) {
        use Transform::*;
        match self {
            Identity => (x, y),
            Rotate90 => (y, s - x),
            Rotate180 => (s - x, s - y),
            Rotate270 => (s - y, x),
            FlipX => (x, s - y),
            FlipY => (s - x, y),
            FlipXy => (y, x),
            FlipYx => (s - y, s - x),
        }
    }
}

struct Zobrist {
    stone: [[u64; MAX_BOARD_SQR]; 2],
    white_turn: u64,
}

fn zobrist() -> &'static Zobrist {
    static TABLE: OnceLock<Zobrist> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut state = 0x8442_5188_28aa_5c4du64;
        let mut stone = [[0u64; MAX_BOARD_SQR]; 2];
        for side in &mut stone {
            for key in side.iter_mut() {
                *key = prng(&mut state);
            }
        }
        Zobrist {
            stone,
            white_turn: prng(&mut state),
        }
    })
}

/// A gomoku/renju position: board occupancy, move history and side to move.
///
/// Values are self-contained and `Clone` is a flat copy, so positions can be
/// snapshotted per ply and shipped between threads freely.
#[derive(Clone)]
pub struct Position {
    board: [Cell; MAX_BOARD_SQR],
    board_size: i32,
    history: Vec<Move>,
    turn: Color,
    key: u64,
    win_line: Vec<Pos>,
}

impl Position {
    pub fn new(board_size: usize) -> Position {
        assert!(board_size > 0 && board_size <= MAX_REAL_BOARD_SIZE);
        let size = board_size as i32;
        let mut board = [Cell::Wall; MAX_BOARD_SQR];
        for x in 0..size {
            for y in 0..size {
                board[pos_from_xy(x, y) as usize] = Cell::Empty;
            }
        }
        Position {
            board,
            board_size: size,
            history: Vec::new(),
            turn: Color::Black,
            key: 0,
            win_line: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.board_size as usize
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn move_count(&self) -> usize {
        self.history.len()
    }

    pub fn moves_left(&self) -> usize {
        (self.board_size * self.board_size) as usize - self.history.len()
    }

    pub fn history(&self) -> &[Move] {
        &self.history
    }

    pub fn zobrist_key(&self) -> u64 {
        self.key
    }

    pub fn win_line(&self) -> &[Pos] {
        &self.win_line
    }

    /// Reset to an empty board of the same size.
    pub fn clear(&mut self) {
        *self = Position::new(self.board_size as usize);
    }

    fn cell(&self, idx: i32) -> Cell {
        self.board[idx as usize]
    }

    fn set_piece(&mut self, pos: Pos, color: Color) {
        debug_assert_eq!(self.board[pos as usize], Cell::Empty);
        self.board[pos as usize] = Cell::Stone(color);
        self.key ^= zobrist().stone[color.index()][pos as usize];
    }

    fn del_piece(&mut self, pos: Pos) {
        debug_assert!(matches!(self.board[pos as usize], Cell::Stone(_)));
        if let Cell::Stone(color) = self.board[pos as usize] {
            self.key ^= zobrist().stone[color.index()][pos as usize];
        }
        self.board[pos as usize] = Cell::Empty;
    }

    /// Play a legal move. The move's color must match the side to move.
    pub fn play(&mut self, mv: Move) {
        debug_assert!(self.is_legal_move(mv));
        self.set_piece(mv.pos(), self.turn);
        self.history.push(mv);
        self.turn = self.turn.opponent();
        self.key ^= zobrist().white_turn;
    }

    /// Take back the last move.
    pub fn undo(&mut self) {
        let last = self.history.pop().expect("undo on empty history");
        self.del_piece(last.pos());
        self.key ^= zobrist().white_turn;
        self.turn = self.turn.opponent();
    }

    pub fn is_legal_move(&self, mv: Move) -> bool {
        let pos = mv.pos() as usize;
        pos < MAX_BOARD_SQR && self.board[pos] == Cell::Empty
    }

    fn in_board_xy(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.board_size && y >= 0 && y < self.board_size
    }

    /// Apply one of the eight symmetries to the whole position: occupancy,
    /// history and recorded winning line.
    pub fn transform(&mut self, t: Transform) {
        if t == Transform::Identity {
            return;
        }
        let s = self.board_size - 1;

        let old = self.board;
        for x in 0..self.board_size {
            for y in 0..self.board_size {
                let pos = pos_from_xy(x, y);
                if old[pos as usize] != Cell::Empty {
                    self.del_piece(pos);
                }
            }
        }
        for x in 0..self.board_size {
            for y in 0..self.board_size {
                if let Cell::Stone(color) = old[pos_from_xy(x, y) as usize] {
                    let (tx, ty) = t.apply(x, y, s);
                    self.set_piece(pos_from_xy(tx, ty), color);
                }
            }
        }

        for mv in &mut self.history {
            let (tx, ty) = t.apply(mv.x(), mv.y(), s);
            *mv = Move::new(tx, ty, mv.color());
        }
        for pos in &mut self.win_line {
            let (tx, ty) = t.apply(coord_x(*pos), coord_y(*pos), s);
            *pos = pos_from_xy(tx, ty);
        }
    }

    /// True iff `s` has the exact shape of a wire move: two non-negative
    /// integers with a single comma between them.
    pub fn is_valid_move_str(s: &str) -> bool {
        let mut parts = s.split(',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(x), Some(y), None) => {
                !x.is_empty()
                    && !y.is_empty()
                    && x.bytes().all(|b| b.is_ascii_digit())
                    && y.bytes().all(|b| b.is_ascii_digit())
            }
            _ => false,
        }
    }

    /// Parse a wire move (`x,y`) into a move for the side to move. Returns
    /// `None` for malformed strings or coordinates off the playable board;
    /// callers treat both the same as an illegal move.
    pub fn move_from_str(&self, s: &str) -> Option<Move> {
        if !Self::is_valid_move_str(s) {
            return None;
        }
        let (xs, ys) = s.split_once(',')?;
        let x: i32 = xs.parse().ok()?;
        let y: i32 = ys.parse().ok()?;
        if !self.in_board_xy(x, y) {
            return None;
        }
        Some(Move::new(x, y, self.turn))
    }

    pub fn move_to_str(mv: Move) -> String {
        format!("{},{}", mv.x(), mv.y())
    }

    pub fn move_to_opening_str(&self, mv: Move, format: OpeningFormat) -> String {
        let half = self.board_size / 2;
        match format {
            OpeningFormat::Offset => format!("{},{}", mv.x() - half, mv.y() - half),
            OpeningFormat::Pos => {
                format!("{}{}", (b'a' + mv.x() as u8) as char, mv.y() + 1)
            }
        }
    }

    /// Reset the board and replay the stones of an opening line, alternating
    /// colors from black. An empty line yields an empty board.
    pub fn apply_opening(&mut self, line: &str, format: OpeningFormat) -> bool {
        let stones = match format {
            OpeningFormat::Offset => self.parse_opening_offsets(line),
            OpeningFormat::Pos => self.parse_opening_positions(line),
        };
        let Some(stones) = stones else {
            return false;
        };
        self.clear();
        for pos in stones {
            self.play(Move::from_pos(pos, self.turn));
        }
        true
    }

    /// Re-encode the move history as an opening line (history must alternate
    /// colors from black, which every played game satisfies).
    pub fn to_opening_str(&self, format: OpeningFormat) -> String {
        let mut out = String::new();
        for (i, mv) in self.history.iter().enumerate() {
            if format == OpeningFormat::Offset && i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.move_to_opening_str(*mv, format));
        }
        out
    }

    fn parse_opening_offsets(&self, line: &str) -> Option<Vec<Pos>> {
        let half = self.board_size / 2;
        let mut stones = Vec::new();
        let mut pending: Option<i32> = None;
        for tok in line.split(|c| c == ',' || c == ' ').filter(|t| !t.is_empty()) {
            let val: i32 = tok.parse().ok()?;
            if !(-16..=15).contains(&val) {
                return None;
            }
            match pending.take() {
                None => pending = Some(val),
                Some(dx) => {
                    let (x, y) = (dx + half, val + half);
                    if !self.in_board_xy(x, y) {
                        return None;
                    }
                    stones.push(pos_from_xy(x, y));
                }
            }
        }
        pending.is_none().then_some(stones)
    }

    fn parse_opening_positions(&self, line: &str) -> Option<Vec<Pos>> {
        let mut values = Vec::new();
        let mut number: Option<i32> = None;
        for ch in line.chars() {
            if ch.is_ascii_lowercase() {
                if let Some(n) = number.take() {
                    values.push(n);
                }
                values.push(ch as i32 - 'a' as i32);
            } else if let Some(d) = ch.to_digit(10) {
                number = Some(number.unwrap_or(0) * 10 + d as i32);
            } else {
                return None;
            }
        }
        if let Some(n) = number {
            values.push(n);
        }
        if values.len() % 2 != 0 {
            return None;
        }
        let mut stones = Vec::new();
        for pair in values.chunks(2) {
            let (x, y) = (pair[0], pair[1] - 1);
            if !self.in_board_xy(x, y) {
                return None;
            }
            stones.push(pos_from_xy(x, y));
        }
        Some(stones)
    }

    /// Scan the whole board for a winning run of `side`. Records the run so
    /// it can be highlighted and exported.
    fn find_five_line(&self, side: Color, allow_long: bool) -> Option<Vec<Pos>> {
        let matches_run = |len: usize| if allow_long { len >= 5 } else { len == 5 };
        let stone = Cell::Stone(side);
        let size = self.board_size;

        let scan = |start: Pos, dir: i32| -> Option<Vec<Pos>> {
            let mut run: Vec<Pos> = Vec::new();
            let mut idx = start as i32;
            loop {
                let cell = self.cell(idx);
                if cell == stone {
                    run.push(idx as Pos);
                } else {
                    if matches_run(run.len()) {
                        return Some(run);
                    }
                    run.clear();
                    if cell == Cell::Wall {
                        return None;
                    }
                }
                idx += dir;
            }
        };

        for i in 0..size {
            // lines of fixed x and fixed y
            if let Some(run) = scan(pos_from_xy(i, 0), DIRECTION[0]) {
                return Some(run);
            }
            if let Some(run) = scan(pos_from_xy(0, i), DIRECTION[2]) {
                return Some(run);
            }
        }
        for k in -(size - 1)..size {
            // diagonals, both families
            let (x, y) = if k <= 0 { (0, -k) } else { (k, 0) };
            if let Some(run) = scan(pos_from_xy(x, y), DIRECTION[3]) {
                return Some(run);
            }
            let (x, y) = if k <= 0 { (0, size - 1 + k) } else { (k, size - 1) };
            if let Some(run) = scan(pos_from_xy(x, y), DIRECTION[1]) {
                return Some(run);
            }
        }
        None
    }

    /// Did the last mover just complete a winning run? Stores the run for
    /// `win_line()` on success.
    pub fn check_five_in_line_lastmove(&mut self, allow_long: bool) -> bool {
        if self.history.len() < 5 {
            return false;
        }
        let last = *self.history.last().expect("non-empty history");
        let Cell::Stone(side) = self.board[last.pos() as usize] else {
            return false;
        };
        match self.find_five_line(side, allow_long) {
            Some(run) => {
                self.win_line = run;
                true
            }
            None => false,
        }
    }

    /// Renju forbidden-move test for black: double-three, double-four or
    /// overline at the candidate (still empty) cell.
    pub fn is_forbidden_move(&self, mv: Move) -> bool {
        if mv.color() != Color::Black || !self.is_legal_move(mv) {
            return false;
        }
        // The pattern finders probe by temporarily placing stones.
        let mut probe = self.clone();
        probe.is_forbidden(mv.pos())
    }

    fn is_forbidden(&mut self, pos: Pos) -> bool {
        self.is_double_three(pos, Color::Black)
            || self.is_double_four(pos, Color::Black)
            || self.is_overline(pos, Color::Black)
    }

    fn is_five_any_dir(&self, pos: Pos, piece: Color) -> bool {
        (0..4).any(|dir| self.is_five(pos, piece, dir))
    }

    fn is_five(&self, pos: Pos, piece: Color, dir: usize) -> bool {
        if self.board[pos as usize] != Cell::Empty {
            return false;
        }
        let stone = Cell::Stone(piece);
        let step = DIRECTION[dir];
        let mut count = 1;
        let mut i = 1;
        while i < 6 && self.cell(pos as i32 - step * i) == stone {
            count += 1;
            i += 1;
        }
        let mut j = 1;
        while j < 7 - i && self.cell(pos as i32 + step * j) == stone {
            count += 1;
            j += 1;
        }
        count == 5
    }

    fn is_overline(&self, pos: Pos, piece: Color) -> bool {
        if self.board[pos as usize] != Cell::Empty {
            return false;
        }
        let stone = Cell::Stone(piece);
        for step in DIRECTION {
            let mut count = 1;
            let mut i = 1;
            while i < 6 && self.cell(pos as i32 - step * i) == stone {
                count += 1;
                i += 1;
            }
            let mut j = 1;
            while j < 7 - i && self.cell(pos as i32 + step * j) == stone {
                count += 1;
                j += 1;
            }
            if count > 5 {
                return true;
            }
        }
        false
    }

    fn is_four(&mut self, pos: Pos, piece: Color, dir: usize) -> bool {
        if self.board[pos as usize] != Cell::Empty
            || self.is_five_any_dir(pos, piece)
            || (piece == Color::Black && self.is_overline(pos, Color::Black))
        {
            return false;
        }
        let stone = Cell::Stone(piece);
        let step = DIRECTION[dir];
        self.set_piece(pos, piece);
        let mut four = false;

        let mut i = 1;
        while i < 5 {
            let probe = pos as i32 - step * i;
            if self.cell(probe) == stone {
                i += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty && self.is_five(probe as Pos, piece, dir) {
                four = true;
            }
            break;
        }
        let mut j = 1;
        while !four && j < 6 - i {
            let probe = pos as i32 + step * j;
            if self.cell(probe) == stone {
                j += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty && self.is_five(probe as Pos, piece, dir) {
                four = true;
            }
            break;
        }

        self.del_piece(pos);
        four
    }

    /// An open four makes five on both ends. A "long" open four (`O_OOO_O`
    /// shapes) counts as two fours for the double-four rule.
    fn open_four_kind(&mut self, pos: Pos, piece: Color, dir: usize) -> OpenFour {
        if self.board[pos as usize] != Cell::Empty
            || self.is_five_any_dir(pos, piece)
            || (piece == Color::Black && self.is_overline(pos, Color::Black))
        {
            return OpenFour::None;
        }
        let stone = Cell::Stone(piece);
        let step = DIRECTION[dir];
        self.set_piece(pos, piece);

        let mut count = 1;
        let mut fives = 0;
        let mut i = 1;
        while i < 5 {
            let probe = pos as i32 - step * i;
            if self.cell(probe) == stone {
                count += 1;
                i += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty && self.is_five(probe as Pos, piece, dir) {
                fives += 1;
            }
            break;
        }
        let mut j = 1;
        while fives > 0 && j < 6 - i {
            let probe = pos as i32 + step * j;
            if self.cell(probe) == stone {
                count += 1;
                j += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty && self.is_five(probe as Pos, piece, dir) {
                fives += 1;
            }
            break;
        }

        self.del_piece(pos);
        match fives {
            2 if count == 4 => OpenFour::True,
            2 => OpenFour::Long,
            _ => OpenFour::None,
        }
    }

    fn is_open_three(&mut self, pos: Pos, piece: Color, dir: usize) -> bool {
        if self.board[pos as usize] != Cell::Empty
            || self.is_five_any_dir(pos, piece)
            || (piece == Color::Black && self.is_overline(pos, Color::Black))
        {
            return false;
        }
        let stone = Cell::Stone(piece);
        let step = DIRECTION[dir];
        self.set_piece(pos, piece);
        let mut open_three = false;

        let mut i = 1;
        while i < 5 {
            let probe = pos as i32 - step * i;
            if self.cell(probe) == stone {
                i += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty
                && self.open_four_kind(probe as Pos, piece, dir) == OpenFour::True
                && !self.is_double_four(probe as Pos, piece)
                && !self.is_double_three(probe as Pos, piece)
            {
                open_three = true;
            }
            break;
        }
        let mut j = 1;
        while !open_three && j < 6 - i {
            let probe = pos as i32 + step * j;
            if self.cell(probe) == stone {
                j += 1;
                continue;
            }
            if self.cell(probe) == Cell::Empty
                && self.open_four_kind(probe as Pos, piece, dir) == OpenFour::True
                && !self.is_double_four(probe as Pos, piece)
                && !self.is_double_three(probe as Pos, piece)
            {
                open_three = true;
            }
            break;
        }

        self.del_piece(pos);
        open_three
    }

    fn is_double_four(&mut self, pos: Pos, piece: Color) -> bool {
        if self.board[pos as usize] != Cell::Empty || self.is_five_any_dir(pos, piece) {
            return false;
        }
        let mut fours = 0;
        for dir in 0..4 {
            match self.open_four_kind(pos, piece, dir) {
                OpenFour::Long => fours += 2,
                _ if self.is_four(pos, piece, dir) => fours += 1,
                _ => {}
            }
            if fours >= 2 {
                return true;
            }
        }
        false
    }

    fn is_double_three(&mut self, pos: Pos, piece: Color) -> bool {
        if self.board[pos as usize] != Cell::Empty || self.is_five_any_dir(pos, piece) {
            return false;
        }
        let mut threes = 0;
        for dir in 0..4 {
            if self.is_open_three(pos, piece, dir) {
                threes += 1;
            }
            if threes >= 2 {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for Position {
    /// ASCII rendering with the winning line (if any) marked `#`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(self.board_size as usize * 2);
        writeln!(f, "  {rule}")?;
        for y in 0..self.board_size {
            write!(f, "  ")?;
            for x in 0..self.board_size {
                let pos = pos_from_xy(x, y);
                let glyph = if self.win_line.contains(&pos) {
                    "# "
                } else {
                    match self.board[pos as usize] {
                        Cell::Stone(Color::Black) => "X ",
                        Cell::Stone(Color::White) => "O ",
                        _ => ". ",
                    }
                };
                write!(f, "{glyph}")?;
            }
            writeln!(f)?;
        }
        write!(f, "  {rule}")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum OpenFour {
    None,
    True,
    Long,
}
