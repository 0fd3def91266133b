use super::constants::*;
use super::types::{Color, PieceType, Square};
use std::sync::OnceLock;

// ==============================================================================
// --- Bitboard helpers ---
// ==============================================================================

/// 81 squares packed in the low bits of a u128.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bitboard(pub u128);

pub const BOARD_MASK: u128 = (1u128 << TOTAL_SQUARES) - 1;

#[inline]
pub const fn ull(sq: usize) -> u128 {
    1u128 << sq
}

impl Bitboard {
    pub const EMPTY: Bitboard = Bitboard(0);
    pub const FULL: Bitboard = Bitboard(BOARD_MASK);

    #[inline]
    pub fn from_square(sq: Square) -> Self {
        Bitboard(ull(sq.index()))
    }

    #[inline]
    pub fn contains(&self, sq: Square) -> bool {
        self.0 & ull(sq.index()) != 0
    }

    #[inline]
    pub fn set(&mut self, sq: Square) {
        self.0 |= ull(sq.index());
    }

    #[inline]
    pub fn clear(&mut self, sq: Square) {
        self.0 &= !ull(sq.index());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn popcount(&self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn intersects(&self, other: Bitboard) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn and(self, other: Bitboard) -> Bitboard {
        Bitboard(self.0 & other.0)
    }

    #[inline]
    pub fn or(self, other: Bitboard) -> Bitboard {
        Bitboard(self.0 | other.0)
    }

    #[inline]
    pub fn not(self) -> Bitboard {
        Bitboard(!self.0 & BOARD_MASK)
    }
}

/// Pops squares from lowest to highest index.
impl Iterator for Bitboard {
    type Item = Square;

    #[inline]
    fn next(&mut self) -> Option<Square> {
        if self.0 == 0 {
            return None;
        }
        let tz = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Square::new(tz)
    }
}

pub const fn file_mask(col: usize) -> u128 {
    let mut m: u128 = 0;
    let mut r = 0;
    while r < BOARD_ROWS {
        m |= ull(r * BOARD_COLS + col);
        r += 1;
    }
    m
}

pub const fn row_mask(row: usize) -> u128 {
    let mut m: u128 = 0;
    let mut c = 0;
    while c < BOARD_COLS {
        m |= ull(row * BOARD_COLS + c);
        c += 1;
    }
    m
}

// ==============================================================================
// --- Zone masks ---
// ==============================================================================

struct ZoneTables {
    /// [color] squares inside the promotion zone
    promotion_zone: [Bitboard; 2],
    /// [color][hand kind] squares a piece of this kind may legally stand on
    placeable: [[Bitboard; NUM_HAND_PIECE_TYPES]; 2],
}

static ZONE_TABLES: OnceLock<ZoneTables> = OnceLock::new();

fn zone_tables() -> &'static ZoneTables {
    ZONE_TABLES.get_or_init(build_zone_tables)
}

fn build_zone_tables() -> ZoneTables {
    let mut promotion_zone = [Bitboard::EMPTY; 2];
    let mut placeable = [[Bitboard::FULL; NUM_HAND_PIECE_TYPES]; 2];

    for color in Color::ALL {
        let far_row = |depth: usize| match color {
            Color::Black => depth,
            Color::White => BOARD_ROWS - 1 - depth,
        };
        for depth in 0..PROMOTION_ZONE_DEPTH {
            promotion_zone[color.idx()].0 |= row_mask(far_row(depth));
        }
        let last = Bitboard(row_mask(far_row(0)));
        let last_two = Bitboard(row_mask(far_row(0)) | row_mask(far_row(1)));
        placeable[color.idx()][PieceType::Pawn.idx()] = last.not();
        placeable[color.idx()][PieceType::Lance.idx()] = last.not();
        placeable[color.idx()][PieceType::Knight.idx()] = last_two.not();
    }

    ZoneTables {
        promotion_zone,
        placeable,
    }
}

pub fn promotion_zone(color: Color) -> Bitboard {
    zone_tables().promotion_zone[color.idx()]
}

/// Squares where an unpromoted piece of this kind still has a legal move afterwards.
pub fn placeable_squares(color: Color, piece_type: PieceType) -> Bitboard {
    if piece_type == PieceType::King {
        return Bitboard::FULL;
    }
    zone_tables().placeable[color.idx()][piece_type.idx()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_yields_every_set_square_once() {
        let mut bb = Bitboard::EMPTY;
        for idx in [0usize, 8, 40, 80] {
            bb.set(Square::new(idx).unwrap());
        }
        let squares: Vec<usize> = bb.map(|s| s.index()).collect();
        assert_eq!(squares, vec![0, 8, 40, 80]);
    }

    #[test]
    fn knight_cannot_stand_on_last_two_rows() {
        let black = placeable_squares(Color::Black, PieceType::Knight);
        assert!(!black.contains(Square::from_usi("5a").unwrap()));
        assert!(!black.contains(Square::from_usi("5b").unwrap()));
        assert!(black.contains(Square::from_usi("5c").unwrap()));
        let white = placeable_squares(Color::White, PieceType::Knight);
        assert!(!white.contains(Square::from_usi("5i").unwrap()));
        assert!(white.contains(Square::from_usi("5a").unwrap()));
    }

    #[test]
    fn promotion_zone_has_three_rows() {
        assert_eq!(promotion_zone(Color::Black).popcount(), 27);
        assert!(promotion_zone(Color::White).contains(Square::from_usi("1g").unwrap()));
    }
}
