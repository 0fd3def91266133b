use std::collections::VecDeque;
use std::fmt;

use super::bitboard::Bitboard;
use super::constants::*;
use super::types::*;
use super::zobrist::zobrist;
use crate::config::RulesConfig;
use crate::error::Result;

// ==============================================================================
// --- Position (Copy, no heap) ---
// ==============================================================================

/// Raw position: grid, hands, side to move and the incrementally maintained
/// bitboards, king squares and hash. All fixed-size so trial searches can work
/// on a stack copy and apply/undo moves in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    board: [Option<Piece>; TOTAL_SQUARES],
    hands: [Hand; 2],
    side_to_move: Color,

    // --- derived, kept in sync by put_piece / remove_piece ---
    occupied: [Bitboard; 2],
    /// unpromoted pawns only (double-pawn restriction)
    pawns: [Bitboard; 2],
    king_squares: [Square; 2],
    hash: u64,
}

/// Everything needed to take a move back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRecord {
    pub mv: Move,
    /// moving piece as it stood on the source square (None for drops)
    pub moved: Option<Piece>,
    pub captured: Option<Piece>,
    pub prev_hash: u64,
}

impl Position {
    pub(crate) fn empty(side_to_move: Color) -> Self {
        let mut pos = Self {
            board: [None; TOTAL_SQUARES],
            hands: [Hand::default(); 2],
            side_to_move,
            occupied: [Bitboard::EMPTY; 2],
            pawns: [Bitboard::EMPTY; 2],
            king_squares: [Square::new_unchecked(0); 2],
            hash: 0,
        };
        pos.hash = pos.compute_hash();
        pos
    }

    pub(crate) fn startpos() -> Self {
        let mut pos = Self::empty(Color::Black);
        let back_rank = [
            PieceType::Lance,
            PieceType::Knight,
            PieceType::Silver,
            PieceType::Gold,
            PieceType::King,
            PieceType::Gold,
            PieceType::Silver,
            PieceType::Knight,
            PieceType::Lance,
        ];
        for (col, &pt) in back_rank.iter().enumerate() {
            pos.place(0, col, Piece::new(pt, Color::White));
            pos.place(8, col, Piece::new(pt, Color::Black));
        }
        for col in 0..BOARD_COLS {
            pos.place(2, col, Piece::new(PieceType::Pawn, Color::White));
            pos.place(6, col, Piece::new(PieceType::Pawn, Color::Black));
        }
        // rook on 8b / 2h, bishop on 2b / 8h
        pos.place(1, 1, Piece::new(PieceType::Rook, Color::White));
        pos.place(1, 7, Piece::new(PieceType::Bishop, Color::White));
        pos.place(7, 1, Piece::new(PieceType::Bishop, Color::Black));
        pos.place(7, 7, Piece::new(PieceType::Rook, Color::Black));
        pos
    }

    fn place(&mut self, row: usize, col: usize, piece: Piece) {
        if let Some(sq) = Square::from_row_col(row, col) {
            self.put_piece(sq, piece);
        }
    }

    // --- accessors ---

    #[inline]
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.board[sq.index()]
    }

    pub fn hand(&self, color: Color) -> &Hand {
        &self.hands[color.idx()]
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn occupied(&self, color: Color) -> Bitboard {
        self.occupied[color.idx()]
    }

    #[inline]
    pub fn all_occupied(&self) -> Bitboard {
        self.occupied[0].or(self.occupied[1])
    }

    #[inline]
    pub fn unpromoted_pawns(&self, color: Color) -> Bitboard {
        self.pawns[color.idx()]
    }

    #[inline]
    pub fn king_square(&self, color: Color) -> Square {
        self.king_squares[color.idx()]
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn set_side_to_move(&mut self, color: Color) {
        if self.side_to_move != color {
            self.side_to_move = color;
            self.hash ^= zobrist().side_to_move();
        }
    }

    pub(crate) fn set_hand_count(&mut self, color: Color, piece_type: PieceType, count: u8) {
        let keys = zobrist();
        let old = self.hands[color.idx()].count(piece_type);
        self.hash ^= keys.hand(color, piece_type, old) ^ keys.hand(color, piece_type, count);
        self.hands[color.idx()].set(piece_type, count);
    }

    // --- incremental primitives ---

    pub(crate) fn put_piece(&mut self, sq: Square, piece: Piece) {
        debug_assert!(self.board[sq.index()].is_none());
        self.board[sq.index()] = Some(piece);
        let c = piece.color.idx();
        self.occupied[c].set(sq);
        if piece.piece_type == PieceType::Pawn && !piece.promoted {
            self.pawns[c].set(sq);
        }
        if piece.piece_type == PieceType::King {
            self.king_squares[c] = sq;
        }
        self.hash ^= zobrist().piece(piece, sq);
    }

    pub(crate) fn remove_piece(&mut self, sq: Square) -> Option<Piece> {
        let piece = self.board[sq.index()].take()?;
        let c = piece.color.idx();
        self.occupied[c].clear(sq);
        if piece.piece_type == PieceType::Pawn && !piece.promoted {
            self.pawns[c].clear(sq);
        }
        self.hash ^= zobrist().piece(piece, sq);
        Some(piece)
    }

    fn add_to_hand(&mut self, color: Color, piece_type: PieceType) {
        let count = self.hands[color.idx()].count(piece_type);
        self.set_hand_count(color, piece_type, count + 1);
    }

    fn take_from_hand(&mut self, color: Color, piece_type: PieceType) {
        let count = self.hands[color.idx()].count(piece_type);
        debug_assert!(count > 0, "drop of {:?} with empty hand", piece_type);
        self.set_hand_count(color, piece_type, count.saturating_sub(1));
    }

    /// Applies a pseudo-legal move in place and returns its undo record.
    /// No legality checks: callers must only pass generated or verified moves.
    pub fn make_move(&mut self, mv: Move) -> UndoRecord {
        let us = self.side_to_move;
        let prev_hash = self.hash;
        let (moved, captured) = match mv {
            Move::Board { from, to, promote } => {
                let moved = self.remove_piece(from);
                let captured = self.remove_piece(to);
                if let Some(cap) = captured {
                    // a captured king never enters a hand
                    if cap.piece_type != PieceType::King {
                        self.add_to_hand(us, cap.piece_type);
                    }
                }
                if let Some(piece) = moved {
                    let placed = if promote { piece.promote() } else { piece };
                    self.put_piece(to, placed);
                }
                (moved, captured)
            }
            Move::Drop { piece_type, to } => {
                self.take_from_hand(us, piece_type);
                self.put_piece(to, Piece::new(piece_type, us));
                (None, None)
            }
        };
        self.side_to_move = us.opposite();
        self.hash ^= zobrist().side_to_move();
        UndoRecord {
            mv,
            moved,
            captured,
            prev_hash,
        }
    }

    pub fn unmake_move(&mut self, undo: UndoRecord) {
        self.side_to_move = self.side_to_move.opposite();
        let us = self.side_to_move;
        match undo.mv {
            Move::Board { from, to, .. } => {
                self.remove_piece(to);
                if let Some(cap) = undo.captured {
                    if cap.piece_type != PieceType::King {
                        self.take_from_hand(us, cap.piece_type);
                    }
                    self.put_piece(to, cap);
                }
                if let Some(piece) = undo.moved {
                    self.put_piece(from, piece);
                }
            }
            Move::Drop { piece_type, to } => {
                self.remove_piece(to);
                self.add_to_hand(us, piece_type);
            }
        }
        self.hash = undo.prev_hash;
    }

    pub(crate) fn compute_hash(&self) -> u64 {
        let keys = zobrist();
        let mut h = 0u64;
        for sq in Square::all() {
            if let Some(p) = self.board[sq.index()] {
                h ^= keys.piece(p, sq);
            }
        }
        for color in Color::ALL {
            for pt in PieceType::HAND {
                h ^= keys.hand(color, pt, self.hands[color.idx()].count(pt));
            }
        }
        if self.side_to_move == Color::White {
            h ^= keys.side_to_move();
        }
        h
    }

    /// Pieces of each base kind (board, either color, plus both hands).
    pub fn material_counts(&self) -> [u32; NUM_PIECE_TYPES] {
        let mut counts = [0u32; NUM_PIECE_TYPES];
        for piece in self.board.iter().flatten() {
            counts[piece.piece_type.idx()] += 1;
        }
        for color in Color::ALL {
            for pt in PieceType::HAND {
                counts[pt.idx()] += self.hands[color.idx()].count(pt) as u32;
            }
        }
        counts
    }
}

// ==============================================================================
// --- GameState ---
// ==============================================================================

/// A game in progress: position plus repetition history, ply counter,
/// last move and lifecycle status.
#[derive(Clone, Debug)]
pub struct GameState {
    pub(crate) position: Position,
    /// plies played, including any implied by the starting SFEN move number
    pub(crate) ply: u32,
    /// hashes of every position reached, most recent last, bounded by `history_limit`
    pub(crate) history: VecDeque<u64>,
    pub(crate) last_move: Option<Move>,
    pub(crate) status: GameStatus,
    pub(crate) config: RulesConfig,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::from_position(Position::startpos(), 0, RulesConfig::default())
    }

    /// Starting position under custom limits; the limits are validated.
    pub fn with_config(config: RulesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_position(Position::startpos(), 0, config))
    }

    pub(crate) fn from_position(position: Position, ply: u32, config: RulesConfig) -> Self {
        let mut history = VecDeque::with_capacity(config.history_limit.min(1024).max(1));
        history.push_back(position.hash());
        Self {
            position,
            ply,
            history,
            last_move: None,
            status: GameStatus::NotStarted,
            config,
        }
    }

    /// Back to the standard starting position; returns the first observation.
    pub fn reset(&mut self) -> Observation {
        *self = Self::from_position(Position::startpos(), 0, self.config);
        self.observation()
    }

    // === accessors ===

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.position.piece_at(sq)
    }

    pub fn hand(&self, color: Color) -> &Hand {
        self.position.hand(color)
    }

    pub fn side_to_move(&self) -> Color {
        self.position.side_to_move()
    }

    pub fn ply(&self) -> u32 {
        self.ply
    }

    pub fn hash(&self) -> u64 {
        self.position.hash()
    }

    pub fn last_move(&self) -> Option<Move> {
        self.last_move
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, GameStatus::Finished(_))
    }

    /// How many times the current position (with side to move) appears in history.
    pub fn repetition_count(&self) -> usize {
        let h = self.position.hash();
        self.history.iter().filter(|&&x| x == h).count()
    }

    pub(crate) fn push_history(&mut self, hash: u64) {
        let limit = self.config.history_limit.max(1);
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(hash);
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   9  8  7  6  5  4  3  2  1")?;
        writeln!(f, "  +---------------------------+")?;
        for row in 0..BOARD_ROWS {
            write!(f, "  |")?;
            for col in 0..BOARD_COLS {
                let cell = Square::from_row_col(row, col)
                    .and_then(|sq| self.position.piece_at(sq))
                    .map(|p| p.short_name())
                    .unwrap_or_else(|| ".".to_string());
                write!(f, "{:>3}", cell)?;
            }
            writeln!(f, "| {}", (b'a' + row as u8) as char)?;
        }
        writeln!(f, "  +---------------------------+")?;
        writeln!(f, "side to move: {}, ply: {}", self.side_to_move(), self.ply)?;
        for color in Color::ALL {
            let held: Vec<String> = self
                .hand(color)
                .available()
                .map(|pt| format!("{}x{}", pt.sfen_char(), self.hand(color).count(pt)))
                .collect();
            writeln!(f, "hand ({}): {}", color, held.join(" "))?;
        }
        Ok(())
    }
}
