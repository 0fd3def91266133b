use ndarray::{Array1, Array3};

use super::board::GameState;
use super::constants::*;
use super::types::*;

// ==============================================================================
// --- Feature extraction (network input) ---
// ==============================================================================

impl GameState {
    /// Board planes and scalars from the side to move's point of view.
    /// When White is to move the board is rotated 180 degrees, so the mover
    /// always advances toward row 0.
    pub fn observation(&self) -> Observation {
        Observation {
            board: self.board_planes(),
            scalars: self.scalar_features(),
        }
    }

    fn board_planes(&self) -> Array3<f32> {
        let mut planes = Array3::<f32>::zeros((BOARD_CHANNELS, BOARD_ROWS, BOARD_COLS));
        let us = self.side_to_move();
        let pos = self.position();

        for color in Color::ALL {
            let base = if color == us { 0 } else { PIECE_PLANES_PER_SIDE };
            for sq in pos.occupied(color) {
                let Some(piece) = pos.piece_at(sq) else {
                    continue;
                };
                let view = match us {
                    Color::Black => sq,
                    Color::White => sq.rotate(),
                };
                planes[[base + piece.plane_index(), view.row(), view.col()]] = 1.0;
            }
        }
        planes
    }

    fn scalar_features(&self) -> Array1<f32> {
        let mut scalars = Vec::with_capacity(SCALAR_FEATURE_COUNT);
        let us = self.side_to_move();

        for color in [us, us.opposite()] {
            let hand = self.hand(color);
            for pt in PieceType::HAND {
                scalars.push(hand.count(pt) as f32 / HAND_MAX_COUNTS[pt.idx()] as f32);
            }
        }
        scalars.push(if us == Color::Black { 1.0 } else { 0.0 });
        let limit = self.config().max_moves_per_game.max(1) as f32;
        scalars.push((self.ply() as f32 / limit).min(1.0));

        Array1::from(scalars)
    }
}
