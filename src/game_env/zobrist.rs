//! Zobrist keys for repetition detection.
//!
//! The position hash covers board, both hands and side to move, and is
//! updated incrementally by move application and undo.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

use super::constants::*;
use super::types::{Color, Piece, PieceType, Square};

/// Largest hand count any kind can reach, plus one.
const HAND_COUNT_SLOTS: usize = 19;

pub struct ZobristKeys {
    /// [color][plane index][square]
    pieces: [[[u64; TOTAL_SQUARES]; PIECE_PLANES_PER_SIDE]; 2],
    /// [color][hand kind][count]
    hands: [[[u64; HAND_COUNT_SLOTS]; NUM_HAND_PIECE_TYPES]; 2],
    /// XORed in when White is to move
    side_to_move: u64,
}

static ZOBRIST: OnceLock<ZobristKeys> = OnceLock::new();

pub fn zobrist() -> &'static ZobristKeys {
    ZOBRIST.get_or_init(build_keys)
}

fn build_keys() -> ZobristKeys {
    // Fixed seed keeps hashes stable across runs
    let mut rng = StdRng::seed_from_u64(0x5348_4f47_4931_3937);
    let mut keys = ZobristKeys {
        pieces: [[[0; TOTAL_SQUARES]; PIECE_PLANES_PER_SIDE]; 2],
        hands: [[[0; HAND_COUNT_SLOTS]; NUM_HAND_PIECE_TYPES]; 2],
        side_to_move: 0,
    };
    for color in 0..2 {
        for plane in 0..PIECE_PLANES_PER_SIDE {
            for sq in 0..TOTAL_SQUARES {
                keys.pieces[color][plane][sq] = rng.gen();
            }
        }
        for pt in 0..NUM_HAND_PIECE_TYPES {
            for n in 0..HAND_COUNT_SLOTS {
                keys.hands[color][pt][n] = rng.gen();
            }
        }
    }
    keys.side_to_move = rng.gen();
    keys
}

impl ZobristKeys {
    #[inline]
    pub fn piece(&self, piece: Piece, sq: Square) -> u64 {
        self.pieces[piece.color.idx()][piece.plane_index()][sq.index()]
    }

    #[inline]
    pub fn hand(&self, color: Color, piece_type: PieceType, count: u8) -> u64 {
        self.hands[color.idx()][piece_type.idx()][(count as usize).min(HAND_COUNT_SLOTS - 1)]
    }

    #[inline]
    pub fn side_to_move(&self) -> u64 {
        self.side_to_move
    }
}
