use std::fmt;

use super::bitboard::{file_mask, placeable_squares, Bitboard};
use super::board::{GameState, Position};
use super::types::*;
use crate::error::{Result, ShogiError};

// ==============================================================================
// --- Movement tables (Black's orientation, White negates both components) ---
// ==============================================================================

type Delta = (i8, i8);

const PAWN_STEPS: &[Delta] = &[(-1, 0)];
const KNIGHT_STEPS: &[Delta] = &[(-2, -1), (-2, 1)];
const SILVER_STEPS: &[Delta] = &[(-1, -1), (-1, 0), (-1, 1), (1, -1), (1, 1)];
const GOLD_STEPS: &[Delta] = &[(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, 0)];
const KING_STEPS: &[Delta] = &[
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const ORTHOGONAL: &[Delta] = &[(-1, 0), (1, 0), (0, -1), (0, 1)];
const DIAGONAL: &[Delta] = &[(-1, -1), (-1, 1), (1, -1), (1, 1)];
const LANCE_SLIDE: &[Delta] = &[(-1, 0)];

/// Single-step moves of a piece, relative to its owner.
fn steps(piece: Piece) -> &'static [Delta] {
    if piece.promoted {
        return match piece.piece_type {
            PieceType::Bishop => ORTHOGONAL,
            PieceType::Rook => DIAGONAL,
            _ => GOLD_STEPS,
        };
    }
    match piece.piece_type {
        PieceType::Pawn => PAWN_STEPS,
        PieceType::Knight => KNIGHT_STEPS,
        PieceType::Silver => SILVER_STEPS,
        PieceType::Gold => GOLD_STEPS,
        PieceType::King => KING_STEPS,
        PieceType::Lance | PieceType::Bishop | PieceType::Rook => &[],
    }
}

/// Sliding directions of a piece, relative to its owner.
fn slides(piece: Piece) -> &'static [Delta] {
    match (piece.piece_type, piece.promoted) {
        (PieceType::Lance, false) => LANCE_SLIDE,
        (PieceType::Bishop, _) => DIAGONAL,
        (PieceType::Rook, _) => ORTHOGONAL,
        _ => &[],
    }
}

/// Converts between owner-relative and board deltas (the map is its own inverse).
#[inline]
fn orient(color: Color, (dr, dc): Delta) -> Delta {
    match color {
        Color::Black => (dr, dc),
        Color::White => (-dr, -dc),
    }
}

// ==============================================================================
// --- Verdicts ---
// ==============================================================================

/// Why a well-formed move is refused in the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IllegalReason {
    NoPieceAtSource,
    OpponentPiece,
    OwnPieceOnTarget,
    Unreachable,
    PromotionNotAllowed,
    PromotionMandatory,
    NotInHand,
    DropSquareOccupied,
    DeadDropSquare,
    DoublePawn,
    DropPawnMate,
    LeavesKingInCheck,
}

impl fmt::Display for IllegalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IllegalReason::NoPieceAtSource => "no piece on the source square",
            IllegalReason::OpponentPiece => "piece belongs to the opponent",
            IllegalReason::OwnPieceOnTarget => "target square holds an own piece",
            IllegalReason::Unreachable => "piece cannot reach the target square",
            IllegalReason::PromotionNotAllowed => "promotion not allowed",
            IllegalReason::PromotionMandatory => "promotion is mandatory",
            IllegalReason::NotInHand => "piece not in hand",
            IllegalReason::DropSquareOccupied => "drop square is occupied",
            IllegalReason::DeadDropSquare => "dropped piece could never move",
            IllegalReason::DoublePawn => "second unpromoted pawn on the file",
            IllegalReason::DropPawnMate => "pawn drop delivers checkmate",
            IllegalReason::LeavesKingInCheck => "own king left in check",
        };
        f.write_str(text)
    }
}

/// Outcome of validating one move. Engine inconsistencies are reported as
/// `Err(ShogiError::Validation)` instead, so they never look like an
/// ordinary illegal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveVerdict {
    Legal,
    Illegal(IllegalReason),
}

impl MoveVerdict {
    pub fn is_legal(&self) -> bool {
        matches!(self, MoveVerdict::Legal)
    }
}

// ==============================================================================
// --- Pseudo-legal generation ---
// ==============================================================================

#[inline]
fn promotion_options(piece: Piece, from: Square, to: Square) -> (bool, bool) {
    let color = piece.color;
    let can = piece.piece_type.can_promote()
        && !piece.promoted
        && (from.in_promotion_zone(color) || to.in_promotion_zone(color));
    let must = !piece.promoted && !placeable_squares(color, piece.piece_type).contains(to);
    (can, must)
}

fn push_board_moves(piece: Piece, from: Square, to: Square, out: &mut Vec<Move>) {
    let (can, must) = promotion_options(piece, from, to);
    if can {
        out.push(Move::board(from, to, true));
    }
    if !must {
        out.push(Move::board(from, to, false));
    }
}

fn generate_board_moves(pos: &Position, out: &mut Vec<Move>) {
    let us = pos.side_to_move();
    let own = pos.occupied(us);
    let all = pos.all_occupied();

    for from in own {
        let Some(piece) = pos.piece_at(from) else {
            continue;
        };
        for &d in steps(piece) {
            let (dr, dc) = orient(us, d);
            if let Some(to) = from.offset(dr, dc) {
                if !own.contains(to) {
                    push_board_moves(piece, from, to, out);
                }
            }
        }
        for &d in slides(piece) {
            let (dr, dc) = orient(us, d);
            let mut cur = from;
            while let Some(to) = cur.offset(dr, dc) {
                if own.contains(to) {
                    break;
                }
                push_board_moves(piece, from, to, out);
                if all.contains(to) {
                    break;
                }
                cur = to;
            }
        }
    }
}

fn drop_targets(pos: &Position, piece_type: PieceType) -> Bitboard {
    let us = pos.side_to_move();
    let mut targets = pos.all_occupied().not().and(placeable_squares(us, piece_type));
    if piece_type == PieceType::Pawn {
        for sq in pos.unpromoted_pawns(us) {
            targets = targets.and(Bitboard(file_mask(sq.col())).not());
        }
    }
    targets
}

fn generate_drops(pos: &Position, out: &mut Vec<Move>) {
    let hand = *pos.hand(pos.side_to_move());
    for piece_type in hand.available() {
        for to in drop_targets(pos, piece_type) {
            out.push(Move::drop(piece_type, to));
        }
    }
}

pub(crate) fn generate_pseudo_legal(pos: &Position, out: &mut Vec<Move>) {
    generate_board_moves(pos, out);
    generate_drops(pos, out);
}

// ==============================================================================
// --- Attack detection ---
// ==============================================================================

/// True if any piece of `by` attacks `target`.
pub(crate) fn is_attacked(pos: &Position, target: Square, by: Color) -> bool {
    // knights jump, so they are checked by reverse offsets
    for &d in KNIGHT_STEPS {
        let (dr, dc) = orient(by, d);
        if let Some(sq) = target.offset(-dr, -dc) {
            if let Some(p) = pos.piece_at(sq) {
                if p.color == by && p.piece_type == PieceType::Knight && !p.promoted {
                    return true;
                }
            }
        }
    }

    for &(dr, dc) in KING_STEPS {
        let mut cur = target;
        let mut dist = 0;
        while let Some(sq) = cur.offset(dr, dc) {
            dist += 1;
            let Some(p) = pos.piece_at(sq) else {
                cur = sq;
                continue;
            };
            if p.color == by {
                // vector from the attacker toward the target, in its owner's frame
                let rel = orient(by, (-dr, -dc));
                if (dist == 1 && steps(p).contains(&rel)) || slides(p).contains(&rel) {
                    return true;
                }
            }
            break;
        }
    }
    false
}

#[inline]
pub(crate) fn in_check(pos: &Position, color: Color) -> bool {
    is_attacked(pos, pos.king_square(color), color.opposite())
}

// ==============================================================================
// --- Legality via apply / undo ---
// ==============================================================================

/// Applies `mv` in place, tests the mover's king, and takes the move back.
fn leaves_king_safe(pos: &mut Position, mv: Move) -> bool {
    let us = pos.side_to_move();
    let undo = pos.make_move(mv);
    let safe = !in_check(pos, us);
    pos.unmake_move(undo);
    safe
}

/// A pawn drop straight in front of the enemy king that leaves it without
/// a reply. The nested reply search skips this rule, which keeps it one level deep.
fn is_drop_pawn_mate(pos: &mut Position, mv: Move) -> bool {
    let Move::Drop {
        piece_type: PieceType::Pawn,
        to,
    } = mv
    else {
        return false;
    };
    let us = pos.side_to_move();
    let their_king = pos.king_square(us.opposite());
    if to.offset(us.forward(), 0) != Some(their_king) {
        return false;
    }
    let undo = pos.make_move(mv);
    let mated = !has_legal_move(pos, false);
    pos.unmake_move(undo);
    mated
}

fn is_legal_candidate(pos: &mut Position, mv: Move, check_drop_mate: bool) -> bool {
    leaves_king_safe(pos, mv) && !(check_drop_mate && is_drop_pawn_mate(pos, mv))
}

pub(crate) fn has_legal_move(pos: &mut Position, check_drop_mate: bool) -> bool {
    let mut pseudo = Vec::with_capacity(128);
    generate_pseudo_legal(pos, &mut pseudo);
    pseudo
        .into_iter()
        .any(|mv| is_legal_candidate(pos, mv, check_drop_mate))
}

/// Appends every legal move of the side to move. `pos` is restored on return.
pub(crate) fn legal_moves_into(pos: &mut Position, out: &mut Vec<Move>) {
    let mut pseudo = Vec::with_capacity(128);
    generate_pseudo_legal(pos, &mut pseudo);
    for mv in pseudo {
        if is_legal_candidate(pos, mv, true) {
            out.push(mv);
        }
    }
}

/// Does `piece` on `from` reach `to` under its movement rules and current blockers?
fn reaches(pos: &Position, piece: Piece, from: Square, to: Square) -> bool {
    let color = piece.color;
    if steps(piece).iter().any(|&d| {
        let (dr, dc) = orient(color, d);
        from.offset(dr, dc) == Some(to)
    }) {
        return true;
    }
    for &d in slides(piece) {
        let (dr, dc) = orient(color, d);
        let mut cur = from;
        while let Some(sq) = cur.offset(dr, dc) {
            if sq == to {
                return true;
            }
            if pos.piece_at(sq).is_some() {
                break;
            }
            cur = sq;
        }
    }
    false
}

fn perft_inner(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut moves = Vec::with_capacity(128);
    legal_moves_into(pos, &mut moves);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0;
    for mv in moves {
        let undo = pos.make_move(mv);
        nodes += perft_inner(pos, depth - 1);
        pos.unmake_move(undo);
    }
    nodes
}

// ==============================================================================
// --- GameState rules API ---
// ==============================================================================

impl GameState {
    /// Every legal move for the side to move; empty once the game is finished.
    /// Works on a private copy of the position, so `self` is never touched.
    pub fn generate_legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::with_capacity(128);
        if self.is_terminal() {
            return moves;
        }
        let mut scratch = self.position;
        legal_moves_into(&mut scratch, &mut moves);
        moves
    }

    pub fn is_in_check(&self) -> bool {
        in_check(&self.position, self.side_to_move())
    }

    /// Validates a single move without applying it.
    pub fn check_move(&self, mv: Move) -> Result<MoveVerdict> {
        if let GameStatus::Finished(outcome) = self.status {
            return Err(ShogiError::TerminalStateViolation {
                outcome,
                sfen: self.to_sfen(),
            });
        }
        let pos = &self.position;
        let us = pos.side_to_move();

        match mv {
            Move::Board { from, to, promote } => {
                let Some(piece) = pos.piece_at(from) else {
                    return Ok(MoveVerdict::Illegal(IllegalReason::NoPieceAtSource));
                };
                if piece.color != us {
                    return Ok(MoveVerdict::Illegal(IllegalReason::OpponentPiece));
                }
                if pos.occupied(us).contains(to) {
                    return Ok(MoveVerdict::Illegal(IllegalReason::OwnPieceOnTarget));
                }
                if !reaches(pos, piece, from, to) {
                    return Ok(MoveVerdict::Illegal(IllegalReason::Unreachable));
                }
                let (can, must) = promotion_options(piece, from, to);
                if promote && !can {
                    return Ok(MoveVerdict::Illegal(IllegalReason::PromotionNotAllowed));
                }
                if !promote && must {
                    return Ok(MoveVerdict::Illegal(IllegalReason::PromotionMandatory));
                }
            }
            Move::Drop { piece_type, to } => {
                if piece_type == PieceType::King {
                    return Err(ShogiError::MalformedInput(format!(
                        "king drop `{}` is not a move",
                        mv
                    )));
                }
                if pos.hand(us).count(piece_type) == 0 {
                    return Ok(MoveVerdict::Illegal(IllegalReason::NotInHand));
                }
                if pos.piece_at(to).is_some() {
                    return Ok(MoveVerdict::Illegal(IllegalReason::DropSquareOccupied));
                }
                if !placeable_squares(us, piece_type).contains(to) {
                    return Ok(MoveVerdict::Illegal(IllegalReason::DeadDropSquare));
                }
                if piece_type == PieceType::Pawn
                    && pos
                        .unpromoted_pawns(us)
                        .intersects(Bitboard(file_mask(to.col())))
                {
                    return Ok(MoveVerdict::Illegal(IllegalReason::DoublePawn));
                }
            }
        }

        let mut scratch = *pos;
        if !leaves_king_safe(&mut scratch, mv) {
            return Ok(MoveVerdict::Illegal(IllegalReason::LeavesKingInCheck));
        }
        if is_drop_pawn_mate(&mut scratch, mv) {
            return Ok(MoveVerdict::Illegal(IllegalReason::DropPawnMate));
        }
        if scratch != *pos {
            return Err(ShogiError::Validation {
                mv,
                detail: "trial apply/undo did not restore the position".into(),
                sfen: self.to_sfen(),
            });
        }
        Ok(MoveVerdict::Legal)
    }

    /// Applies a legal move and reports whether the game goes on.
    pub fn apply_move(&mut self, mv: Move) -> Result<GameOutcome> {
        if let MoveVerdict::Illegal(reason) = self.check_move(mv)? {
            return Err(ShogiError::IllegalMove {
                mv,
                reason,
                sfen: self.to_sfen(),
            });
        }

        let mover = self.side_to_move();
        let undo = self.position.make_move(mv);
        if matches!(undo.captured, Some(p) if p.piece_type == PieceType::King) {
            self.position.unmake_move(undo);
            return Err(ShogiError::Validation {
                mv,
                detail: "move captures the king".into(),
                sfen: self.to_sfen(),
            });
        }

        self.ply += 1;
        self.last_move = Some(mv);
        self.push_history(self.position.hash());

        let outcome = self.evaluate_outcome(mover);
        self.status = if outcome.is_terminal() {
            GameStatus::Finished(outcome)
        } else {
            GameStatus::InProgress
        };
        Ok(outcome)
    }

    /// Terminal checks in priority order: mate / stalemate, repetition, move limit.
    fn evaluate_outcome(&self, mover: Color) -> GameOutcome {
        let mut scratch = self.position;
        if !has_legal_move(&mut scratch, true) {
            return if in_check(&scratch, scratch.side_to_move()) {
                GameOutcome::Checkmate { winner: mover }
            } else {
                GameOutcome::Stalemate
            };
        }
        if self.repetition_count() >= self.config.repetition_threshold as usize {
            return GameOutcome::RepetitionDraw;
        }
        if self.ply >= self.config.max_moves_per_game {
            return GameOutcome::MoveLimitReached;
        }
        GameOutcome::Continuing
    }

    /// Leaf count of the legal-move tree. Repetition and move limits are ignored.
    pub fn perft(&self, depth: u32) -> u64 {
        let mut scratch = self.position;
        perft_inner(&mut scratch, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usi(text: &str) -> Move {
        Move::from_usi(text).unwrap()
    }

    #[test]
    fn startpos_has_thirty_moves() {
        let state = GameState::new();
        let moves = state.generate_legal_moves();
        assert_eq!(moves.len(), 30);
        assert!(moves.contains(&usi("7g7f")));
        assert!(moves.contains(&usi("2h1h")));
        assert!(!state.is_in_check());
    }

    #[test]
    fn generation_does_not_mutate_state() {
        let state = GameState::new();
        let before = *state.position();
        let _ = state.generate_legal_moves();
        assert_eq!(*state.position(), before);
    }

    #[test]
    fn pawn_on_last_rank_must_promote() {
        let state = GameState::from_sfen("4k4/P8/9/9/9/9/9/9/4K4 b - 1").unwrap();
        let moves = state.generate_legal_moves();
        assert!(moves.contains(&usi("9b9a+")));
        assert!(!moves.contains(&usi("9b9a")));
        assert_eq!(
            state.check_move(usi("9b9a")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::PromotionMandatory)
        );
    }

    #[test]
    fn promotion_outside_zone_is_refused() {
        let state = GameState::new();
        assert_eq!(
            state.check_move(usi("7g7f+")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::PromotionNotAllowed)
        );
    }

    #[test]
    fn double_pawn_drops_are_excluded() {
        let state = GameState::from_sfen("4k4/9/9/9/9/9/4P4/9/4K4 b P 1").unwrap();
        let drops: Vec<Move> = state
            .generate_legal_moves()
            .into_iter()
            .filter(|m| m.is_drop())
            .collect();
        assert_eq!(drops.len(), 64);
        assert!(drops.iter().all(|m| m.to().file() != 5));
        assert_eq!(
            state.check_move(usi("P*5e")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::DoublePawn)
        );
        assert_eq!(
            state.check_move(usi("P*4a")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::DeadDropSquare)
        );
    }

    #[test]
    fn pawn_drop_mate_is_illegal() {
        let state = GameState::from_sfen("7lk/7p1/7G1/9/9/9/9/9/4K4 b P 1").unwrap();
        let moves = state.generate_legal_moves();
        assert!(!moves.contains(&usi("P*1b")));
        assert_eq!(
            state.check_move(usi("P*1b")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::DropPawnMate)
        );
    }

    #[test]
    fn pawn_drop_check_with_escape_is_legal() {
        let state = GameState::from_sfen("8k/7p1/7G1/9/9/9/9/9/4K4 b P 1").unwrap();
        assert!(state.generate_legal_moves().contains(&usi("P*1b")));
    }

    #[test]
    fn pinned_piece_cannot_leave_the_line() {
        // black gold on 5h pinned by the white rook on 5a
        let state = GameState::from_sfen("3kr4/9/9/9/9/9/9/4G4/4K4 b - 1").unwrap();
        assert_eq!(
            state.check_move(usi("5h4h")).unwrap(),
            MoveVerdict::Illegal(IllegalReason::LeavesKingInCheck)
        );
        assert!(state.check_move(usi("5h5g")).unwrap().is_legal());
    }

    #[test]
    fn apply_move_rejects_illegal_and_keeps_state() {
        let mut state = GameState::new();
        let before = state.to_sfen();
        let err = state.apply_move(usi("7g7e")).unwrap_err();
        assert!(matches!(
            err,
            ShogiError::IllegalMove {
                reason: IllegalReason::Unreachable,
                ..
            }
        ));
        assert_eq!(state.to_sfen(), before);
        assert_eq!(state.status(), GameStatus::NotStarted);
    }

    #[test]
    fn checkmate_ends_the_game() {
        // gold drop on 5b mates the bare king supported by the pawn on 5c
        let mut state = GameState::from_sfen("4k4/9/4P4/9/9/9/9/9/4K4 b G 1").unwrap();
        let outcome = state.apply_move(usi("G*5b")).unwrap();
        assert_eq!(
            outcome,
            GameOutcome::Checkmate {
                winner: Color::Black
            }
        );
        assert!(state.generate_legal_moves().is_empty());
        assert!(matches!(
            state.apply_move(usi("5a4a")),
            Err(ShogiError::TerminalStateViolation { .. })
        ));
    }

    #[test]
    fn king_drop_is_malformed() {
        let state = GameState::new();
        let mv = Move::Drop {
            piece_type: PieceType::King,
            to: Square::from_usi("5e").unwrap(),
        };
        assert!(matches!(
            state.check_move(mv),
            Err(ShogiError::MalformedInput(_))
        ));
    }

    #[test]
    fn perft_two_plies_from_start() {
        assert_eq!(GameState::new().perft(1), 30);
        assert_eq!(GameState::new().perft(2), 900);
    }
}
