use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::constants::*;
use crate::error::{Result, ShogiError};

// ==============================================================================
// --- Players and pieces ---
// ==============================================================================

/// Side to move. Black (sente) moves first and advances toward row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Black = 0,
    White = 1,
}

impl Color {
    pub const ALL: [Color; 2] = [Color::Black, Color::White];

    pub fn opposite(&self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    pub fn idx(&self) -> usize {
        *self as usize
    }

    /// Row delta of a single forward step.
    pub fn forward(&self) -> i8 {
        match self {
            Color::Black => -1,
            Color::White => 1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "Black"),
            Color::White => write!(f, "White"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PieceType {
    Pawn = 0,
    Lance = 1,
    Knight = 2,
    Silver = 3,
    Gold = 4,
    Bishop = 5,
    Rook = 6,
    King = 7,
}

impl PieceType {
    pub const ALL: [PieceType; NUM_PIECE_TYPES] = [
        PieceType::Pawn,
        PieceType::Lance,
        PieceType::Knight,
        PieceType::Silver,
        PieceType::Gold,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::King,
    ];

    /// Kinds that may be held in hand, in hand-index order.
    pub const HAND: [PieceType; NUM_HAND_PIECE_TYPES] = [
        PieceType::Pawn,
        PieceType::Lance,
        PieceType::Knight,
        PieceType::Silver,
        PieceType::Gold,
        PieceType::Bishop,
        PieceType::Rook,
    ];

    pub fn idx(&self) -> usize {
        *self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn can_promote(&self) -> bool {
        !matches!(self, PieceType::Gold | PieceType::King)
    }

    /// Plane offset of the promoted form, `None` for gold and king.
    pub fn promoted_index(&self) -> Option<usize> {
        match self {
            PieceType::Pawn => Some(0),
            PieceType::Lance => Some(1),
            PieceType::Knight => Some(2),
            PieceType::Silver => Some(3),
            PieceType::Bishop => Some(4),
            PieceType::Rook => Some(5),
            PieceType::Gold | PieceType::King => None,
        }
    }

    /// Upper-case SFEN letter of the unpromoted kind.
    pub fn sfen_char(&self) -> char {
        match self {
            PieceType::Pawn => 'P',
            PieceType::Lance => 'L',
            PieceType::Knight => 'N',
            PieceType::Silver => 'S',
            PieceType::Gold => 'G',
            PieceType::Bishop => 'B',
            PieceType::Rook => 'R',
            PieceType::King => 'K',
        }
    }

    pub fn from_sfen_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'P' => Some(PieceType::Pawn),
            'L' => Some(PieceType::Lance),
            'N' => Some(PieceType::Knight),
            'S' => Some(PieceType::Silver),
            'G' => Some(PieceType::Gold),
            'B' => Some(PieceType::Bishop),
            'R' => Some(PieceType::Rook),
            'K' => Some(PieceType::King),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub piece_type: PieceType,
    pub color: Color,
    pub promoted: bool,
}

impl Piece {
    pub fn new(piece_type: PieceType, color: Color) -> Self {
        Self {
            piece_type,
            color,
            promoted: false,
        }
    }

    pub fn new_promoted(piece_type: PieceType, color: Color) -> Self {
        debug_assert!(piece_type.can_promote());
        Self {
            piece_type,
            color,
            promoted: true,
        }
    }

    pub fn promote(self) -> Self {
        Self {
            promoted: true,
            ..self
        }
    }

    /// Index into a side's 14 piece planes.
    pub fn plane_index(&self) -> usize {
        if self.promoted {
            NUM_PIECE_TYPES + self.piece_type.promoted_index().unwrap_or(0)
        } else {
            self.piece_type.idx()
        }
    }

    pub fn short_name(&self) -> String {
        let base = self.piece_type.sfen_char();
        let c = match self.color {
            Color::Black => base,
            Color::White => base.to_ascii_lowercase(),
        };
        if self.promoted {
            format!("+{}", c)
        } else {
            c.to_string()
        }
    }
}

// ==============================================================================
// --- Squares ---
// ==============================================================================

/// Board square. Index = row * 9 + col, row 0 is rank `a`, col 0 is file 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square(u8);

impl Square {
    pub fn new(index: usize) -> Option<Self> {
        if index < TOTAL_SQUARES {
            Some(Square(index as u8))
        } else {
            None
        }
    }

    pub(crate) const fn new_unchecked(index: u8) -> Self {
        Square(index)
    }

    pub fn from_row_col(row: usize, col: usize) -> Option<Self> {
        if row < BOARD_ROWS && col < BOARD_COLS {
            Some(Square((row * BOARD_COLS + col) as u8))
        } else {
            None
        }
    }

    /// USI coordinates: file 1..=9, rank 1..=9 (rank 1 is `a`).
    pub fn from_file_rank(file: usize, rank: usize) -> Option<Self> {
        if (1..=9).contains(&file) && (1..=9).contains(&rank) {
            Self::from_row_col(rank - 1, BOARD_COLS - file)
        } else {
            None
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn row(&self) -> usize {
        self.index() / BOARD_COLS
    }

    #[inline]
    pub fn col(&self) -> usize {
        self.index() % BOARD_COLS
    }

    pub fn file(&self) -> usize {
        BOARD_COLS - self.col()
    }

    pub fn rank(&self) -> usize {
        self.row() + 1
    }

    #[inline]
    pub fn offset(&self, d_row: i8, d_col: i8) -> Option<Self> {
        let r = self.row() as i32 + d_row as i32;
        let c = self.col() as i32 + d_col as i32;
        if r < 0 || c < 0 {
            return None;
        }
        Self::from_row_col(r as usize, c as usize)
    }

    /// Same square seen from the other side of the board.
    pub fn rotate(&self) -> Self {
        Square((TOTAL_SQUARES - 1 - self.index()) as u8)
    }

    /// Number of rows between this square and `color`'s far edge.
    pub fn rows_from_far_edge(&self, color: Color) -> usize {
        match color {
            Color::Black => self.row(),
            Color::White => BOARD_ROWS - 1 - self.row(),
        }
    }

    pub fn in_promotion_zone(&self, color: Color) -> bool {
        self.rows_from_far_edge(color) < PROMOTION_ZONE_DEPTH
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..TOTAL_SQUARES as u8).map(Square)
    }

    pub fn from_usi(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let (Some(f), Some(r), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(ShogiError::MalformedInput(format!("bad square `{}`", s)));
        };
        let file = f.to_digit(10).map(|d| d as usize);
        let rank = ('a'..='i').position(|c| c == r).map(|p| p + 1);
        match (file, rank) {
            (Some(file), Some(rank)) => Self::from_file_rank(file, rank)
                .ok_or_else(|| ShogiError::MalformedInput(format!("bad square `{}`", s))),
            _ => Err(ShogiError::MalformedInput(format!("bad square `{}`", s))),
        }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.file(), (b'a' + self.row() as u8) as char)
    }
}

// ==============================================================================
// --- Moves ---
// ==============================================================================

/// A board move or a drop, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Move {
    Board {
        from: Square,
        to: Square,
        promote: bool,
    },
    Drop {
        piece_type: PieceType,
        to: Square,
    },
}

impl Move {
    pub fn board(from: Square, to: Square, promote: bool) -> Self {
        Move::Board { from, to, promote }
    }

    pub fn drop(piece_type: PieceType, to: Square) -> Self {
        Move::Drop { piece_type, to }
    }

    pub fn to(&self) -> Square {
        match self {
            Move::Board { to, .. } | Move::Drop { to, .. } => *to,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Move::Drop { .. })
    }

    /// Parses USI notation: `7g7f`, `8h2b+`, `P*5e`.
    pub fn from_usi(s: &str) -> Result<Self> {
        let malformed = || ShogiError::MalformedInput(format!("bad USI move `{}`", s));
        if !s.is_ascii() {
            return Err(malformed());
        }
        if let Some((piece, square)) = s.split_once('*') {
            let mut pc = piece.chars();
            let (Some(c), None) = (pc.next(), pc.next()) else {
                return Err(malformed());
            };
            if !c.is_ascii_uppercase() {
                return Err(malformed());
            }
            let piece_type = PieceType::from_sfen_char(c).ok_or_else(malformed)?;
            if piece_type == PieceType::King {
                return Err(malformed());
            }
            return Ok(Move::drop(piece_type, Square::from_usi(square)?));
        }
        let (body, promote) = match s.strip_suffix('+') {
            Some(b) => (b, true),
            None => (s, false),
        };
        if body.len() != 4 {
            return Err(malformed());
        }
        let from = Square::from_usi(&body[0..2])?;
        let to = Square::from_usi(&body[2..4])?;
        if from == to {
            return Err(malformed());
        }
        Ok(Move::board(from, to, promote))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Board { from, to, promote } => {
                write!(f, "{}{}{}", from, to, if *promote { "+" } else { "" })
            }
            Move::Drop { piece_type, to } => write!(f, "{}*{}", piece_type.sfen_char(), to),
        }
    }
}

// ==============================================================================
// --- Hands ---
// ==============================================================================

/// Captured pieces available for dropping, counted per hand kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hand {
    counts: [u8; NUM_HAND_PIECE_TYPES],
}

impl Hand {
    pub fn count(&self, piece_type: PieceType) -> u8 {
        if piece_type == PieceType::King {
            return 0;
        }
        self.counts[piece_type.idx()]
    }

    pub fn add(&mut self, piece_type: PieceType) {
        debug_assert!(piece_type != PieceType::King, "kings never enter a hand");
        self.counts[piece_type.idx()] += 1;
    }

    /// Returns false (and leaves the hand unchanged) when the kind is absent.
    pub fn remove(&mut self, piece_type: PieceType) -> bool {
        if piece_type == PieceType::King || self.counts[piece_type.idx()] == 0 {
            return false;
        }
        self.counts[piece_type.idx()] -= 1;
        true
    }

    pub fn set(&mut self, piece_type: PieceType, count: u8) {
        self.counts[piece_type.idx()] = count;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Hand kinds with a non-zero count.
    pub fn available(&self) -> impl Iterator<Item = PieceType> + '_ {
        PieceType::HAND
            .iter()
            .copied()
            .filter(move |pt| self.counts[pt.idx()] > 0)
    }
}

// ==============================================================================
// --- Outcomes ---
// ==============================================================================

/// Result of applying a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameOutcome {
    Continuing,
    Checkmate { winner: Color },
    Stalemate,
    RepetitionDraw,
    MoveLimitReached,
}

impl GameOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameOutcome::Continuing)
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            GameOutcome::Checkmate { winner } => Some(*winner),
            _ => None,
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::Continuing => write!(f, "continuing"),
            GameOutcome::Checkmate { winner } => write!(f, "checkmate, {} wins", winner),
            GameOutcome::Stalemate => write!(f, "stalemate"),
            GameOutcome::RepetitionDraw => write!(f, "repetition draw"),
            GameOutcome::MoveLimitReached => write!(f, "move limit reached"),
        }
    }
}

/// Lifecycle of a game: `NotStarted -> InProgress -> Finished(..)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    NotStarted,
    InProgress,
    Finished(GameOutcome),
}

// ==============================================================================
// --- Network input ---
// ==============================================================================

/// Observation fed to the model, always from the side to move's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Piece planes: (Channels, H, W)
    pub board: Array3<f32>,
    /// Hand counts and global scalars: (Features,)
    pub scalars: Array1<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_coordinates_follow_usi() {
        let sq = Square::from_usi("7g").unwrap();
        assert_eq!(sq.file(), 7);
        assert_eq!(sq.rank(), 7);
        assert_eq!(sq.row(), 6);
        assert_eq!(sq.col(), 2);
        assert_eq!(sq.to_string(), "7g");
        assert_eq!(Square::from_usi("9a").unwrap().index(), 0);
        assert_eq!(Square::from_usi("1i").unwrap().index(), 80);
        assert!(Square::from_usi("0a").is_err());
        assert!(Square::from_usi("5j").is_err());
    }

    #[test]
    fn usi_moves_parse_and_print() {
        for text in ["7g7f", "8h2b+", "P*5e", "R*1a"] {
            let mv = Move::from_usi(text).unwrap();
            assert_eq!(mv.to_string(), text);
        }
        assert!(Move::from_usi("K*5e").is_err());
        assert!(Move::from_usi("7g7g").is_err());
        assert!(Move::from_usi("7g7").is_err());
        assert!(Move::from_usi("p*5e").is_err());
    }

    #[test]
    fn hand_refuses_to_go_negative() {
        let mut hand = Hand::default();
        assert!(!hand.remove(PieceType::Gold));
        hand.add(PieceType::Gold);
        assert_eq!(hand.count(PieceType::Gold), 1);
        assert!(hand.remove(PieceType::Gold));
        assert!(hand.is_empty());
    }

    #[test]
    fn promotion_zone_is_relative_to_color() {
        let sq = Square::from_usi("5c").unwrap();
        assert!(sq.in_promotion_zone(Color::Black));
        assert!(!sq.in_promotion_zone(Color::White));
        assert!(sq.rotate().in_promotion_zone(Color::White));
    }
}
