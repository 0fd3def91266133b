// ==============================================================================
// --- Board geometry ---
// ==============================================================================

/// Board rows (ranks a..i, top to bottom)
pub const BOARD_ROWS: usize = 9;
/// Board columns (files 9..1, left to right)
pub const BOARD_COLS: usize = 9;
/// Total squares (81)
pub const TOTAL_SQUARES: usize = BOARD_ROWS * BOARD_COLS;

/// Piece kinds including the king (pawn, lance, knight, silver, gold, bishop, rook, king)
pub const NUM_PIECE_TYPES: usize = 8;
/// Piece kinds that can sit in a hand (everything except the king)
pub const NUM_HAND_PIECE_TYPES: usize = 7;
/// Piece kinds that have a promoted form (pawn, lance, knight, silver, bishop, rook)
pub const NUM_PROMOTABLE_TYPES: usize = 6;

/// Depth of the promotion zone counted from the far side
pub const PROMOTION_ZONE_DEPTH: usize = 3;

/// Most copies of each hand kind a single player can ever hold, indexed like `PieceType`
pub const HAND_MAX_COUNTS: [u8; NUM_HAND_PIECE_TYPES] = [18, 4, 4, 4, 4, 2, 2];

// ==============================================================================
// --- Game limits ---
// ==============================================================================

/// Default ply limit before a game is stopped with `MoveLimitReached`
pub const DEFAULT_MAX_MOVES_PER_GAME: u32 = 500;
/// Default number of occurrences of one position that ends the game in a draw
pub const DEFAULT_REPETITION_THRESHOLD: u32 = 4;
/// Default number of position hashes kept for repetition detection
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Standard starting position
pub const START_SFEN: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

// ==============================================================================
// --- Action space ---
// ==============================================================================

/// Board moves: every ordered (from, to) pair with from != to, with and without promotion
pub const BOARD_MOVE_ACTIONS_COUNT: usize = TOTAL_SQUARES * (TOTAL_SQUARES - 1) * 2;
/// Drops: every hand kind onto every square
pub const DROP_ACTIONS_COUNT: usize = NUM_HAND_PIECE_TYPES * TOTAL_SQUARES;
/// Size of the flat action universe (13527)
pub const ACTION_SPACE_SIZE: usize = BOARD_MOVE_ACTIONS_COUNT + DROP_ACTIONS_COUNT;

// ==============================================================================
// --- Observation layout ---
// ==============================================================================

/// Piece planes per side: 8 base kinds + 6 promoted kinds
pub const PIECE_PLANES_PER_SIDE: usize = NUM_PIECE_TYPES + NUM_PROMOTABLE_TYPES;
/// Board tensor channels: own pieces + opponent pieces
pub const BOARD_CHANNELS: usize = 2 * PIECE_PLANES_PER_SIDE;
/// Scalar features: own hand (7) + opponent hand (7) + side to move + game progress
pub const SCALAR_FEATURE_COUNT: usize = 2 * NUM_HAND_PIECE_TYPES + 2;
