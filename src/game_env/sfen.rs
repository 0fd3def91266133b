//! SFEN position notation.
//!
//! `<board> <side> <hands> <move number>`, e.g. the start position
//! `lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1`.
//! Board ranks are listed from `a` to `i`, files from 9 to 1.

use super::bitboard::{file_mask, placeable_squares, Bitboard};
use super::board::{GameState, Position};
use super::constants::*;
use super::rules::in_check;
use super::types::*;
use crate::config::RulesConfig;
use crate::error::{Result, ShogiError};

/// Total copies of each base kind in a full set, indexed like `PieceType`.
const PIECE_SET: [u32; NUM_PIECE_TYPES] = [18, 4, 4, 4, 4, 2, 2, 2];

/// Hand order used when writing SFEN.
const HAND_WRITE_ORDER: [PieceType; NUM_HAND_PIECE_TYPES] = [
    PieceType::Rook,
    PieceType::Bishop,
    PieceType::Gold,
    PieceType::Silver,
    PieceType::Knight,
    PieceType::Lance,
    PieceType::Pawn,
];

fn malformed(sfen: &str, detail: impl std::fmt::Display) -> ShogiError {
    ShogiError::MalformedInput(format!("sfen `{}`: {}", sfen, detail))
}

fn parse_board(sfen: &str, text: &str, pos: &mut Position) -> Result<()> {
    let ranks: Vec<&str> = text.split('/').collect();
    if ranks.len() != BOARD_ROWS {
        return Err(malformed(sfen, format!("expected {} ranks", BOARD_ROWS)));
    }
    for (row, rank) in ranks.iter().enumerate() {
        let mut col = 0usize;
        let mut promoted = false;
        for c in rank.chars() {
            if let Some(n) = c.to_digit(10) {
                if promoted || n == 0 {
                    return Err(malformed(sfen, format!("bad empty run in rank {}", row + 1)));
                }
                col += n as usize;
                continue;
            }
            if c == '+' {
                if promoted {
                    return Err(malformed(sfen, "double promotion marker"));
                }
                promoted = true;
                continue;
            }
            let piece_type = PieceType::from_sfen_char(c)
                .ok_or_else(|| malformed(sfen, format!("unknown piece `{}`", c)))?;
            let color = if c.is_ascii_uppercase() {
                Color::Black
            } else {
                Color::White
            };
            if promoted && !piece_type.can_promote() {
                return Err(malformed(sfen, format!("`+{}` cannot be promoted", c)));
            }
            let sq = Square::from_row_col(row, col)
                .ok_or_else(|| malformed(sfen, format!("rank {} overflows", row + 1)))?;
            let piece = if promoted {
                Piece::new_promoted(piece_type, color)
            } else {
                Piece::new(piece_type, color)
            };
            pos.put_piece(sq, piece);
            promoted = false;
            col += 1;
        }
        if promoted {
            return Err(malformed(sfen, "dangling promotion marker"));
        }
        if col != BOARD_COLS {
            return Err(malformed(sfen, format!("rank {} has {} files", row + 1, col)));
        }
    }
    Ok(())
}

fn parse_hands(sfen: &str, text: &str, pos: &mut Position) -> Result<()> {
    if text == "-" {
        return Ok(());
    }
    let mut count: Option<u32> = None;
    for c in text.chars() {
        if let Some(d) = c.to_digit(10) {
            count = Some(count.unwrap_or(0) * 10 + d);
            if count.unwrap_or(0) > 18 {
                return Err(malformed(sfen, "hand count too large"));
            }
            continue;
        }
        let piece_type = PieceType::from_sfen_char(c)
            .filter(|pt| *pt != PieceType::King)
            .ok_or_else(|| malformed(sfen, format!("bad hand piece `{}`", c)))?;
        let color = if c.is_ascii_uppercase() {
            Color::Black
        } else {
            Color::White
        };
        let n = count.take().unwrap_or(1);
        if n == 0 {
            return Err(malformed(sfen, "zero hand count"));
        }
        let total = pos.hand(color).count(piece_type) as u32 + n;
        pos.set_hand_count(color, piece_type, total.min(u8::MAX as u32) as u8);
    }
    if count.is_some() {
        return Err(malformed(sfen, "hand count without piece"));
    }
    Ok(())
}

/// Rejects positions no legal game can reach.
fn validate(sfen: &str, pos: &Position) -> Result<()> {
    for color in Color::ALL {
        let kings = pos
            .occupied(color)
            .filter(|&sq| matches!(pos.piece_at(sq), Some(p) if p.piece_type == PieceType::King))
            .count();
        if kings != 1 {
            return Err(malformed(sfen, format!("{} has {} kings", color, kings)));
        }
    }

    let counts = pos.material_counts();
    for pt in PieceType::ALL {
        if counts[pt.idx()] > PIECE_SET[pt.idx()] {
            return Err(malformed(
                sfen,
                format!("{} copies of {:?}", counts[pt.idx()], pt),
            ));
        }
    }

    for color in Color::ALL {
        let pawns = pos.unpromoted_pawns(color);
        for col in 0..BOARD_COLS {
            if pawns.and(Bitboard(file_mask(col))).popcount() > 1 {
                return Err(malformed(
                    sfen,
                    format!("{} has two pawns on file {}", color, BOARD_COLS - col),
                ));
            }
        }
        for sq in pos.occupied(color) {
            if let Some(p) = pos.piece_at(sq) {
                if !p.promoted && !placeable_squares(color, p.piece_type).contains(sq) {
                    return Err(malformed(sfen, format!("{} on {} can never move", p.short_name(), sq)));
                }
            }
        }
    }

    if in_check(pos, pos.side_to_move().opposite()) {
        return Err(malformed(sfen, "side not to move is in check"));
    }
    Ok(())
}

impl GameState {
    pub fn from_sfen(sfen: &str) -> Result<Self> {
        Self::from_sfen_with_config(sfen, RulesConfig::default())
    }

    pub fn from_sfen_with_config(sfen: &str, config: RulesConfig) -> Result<Self> {
        config.validate()?;
        let fields: Vec<&str> = sfen.split_whitespace().collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(malformed(sfen, "expected 3 or 4 fields"));
        }

        let side = match fields[1] {
            "b" => Color::Black,
            "w" => Color::White,
            other => return Err(malformed(sfen, format!("bad side `{}`", other))),
        };
        let mut pos = Position::empty(side);
        parse_board(sfen, fields[0], &mut pos)?;
        parse_hands(sfen, fields[2], &mut pos)?;

        let move_number = match fields.get(3) {
            Some(text) => text
                .parse::<u32>()
                .ok()
                .filter(|&n| n >= 1)
                .ok_or_else(|| malformed(sfen, format!("bad move number `{}`", text)))?,
            None => 1,
        };

        validate(sfen, &pos)?;
        Ok(Self::from_position(pos, move_number - 1, config))
    }

    pub fn to_sfen(&self) -> String {
        let pos = &self.position;
        let mut out = String::with_capacity(96);

        for row in 0..BOARD_ROWS {
            if row > 0 {
                out.push('/');
            }
            let mut empty = 0;
            for col in 0..BOARD_COLS {
                match Square::from_row_col(row, col).and_then(|sq| pos.piece_at(sq)) {
                    Some(p) => {
                        if empty > 0 {
                            out.push_str(&empty.to_string());
                            empty = 0;
                        }
                        out.push_str(&p.short_name());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push_str(&empty.to_string());
            }
        }

        out.push(' ');
        out.push(match pos.side_to_move() {
            Color::Black => 'b',
            Color::White => 'w',
        });
        out.push(' ');

        let mut hands = String::new();
        for color in Color::ALL {
            for pt in HAND_WRITE_ORDER {
                let n = pos.hand(color).count(pt);
                if n == 0 {
                    continue;
                }
                if n > 1 {
                    hands.push_str(&n.to_string());
                }
                let c = pt.sfen_char();
                hands.push(match color {
                    Color::Black => c,
                    Color::White => c.to_ascii_lowercase(),
                });
            }
        }
        if hands.is_empty() {
            hands.push('-');
        }
        out.push_str(&hands);
        out.push(' ');
        out.push_str(&(self.ply + 1).to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_matches_constant() {
        let parsed = GameState::from_sfen(START_SFEN).unwrap();
        assert_eq!(parsed.position(), GameState::new().position());
        assert_eq!(GameState::new().to_sfen(), START_SFEN);
    }

    #[test]
    fn hands_and_promoted_pieces_survive_a_round_trip() {
        let text = "lnsgk2nl/1r4g2/p1ppppsp1/6p1p/1p7/2P6/PP1PPPP2/7R1/LNSGKGSNL b B2Pb 12";
        let state = GameState::from_sfen(text).unwrap();
        assert_eq!(state.hand(Color::Black).count(PieceType::Pawn), 2);
        assert_eq!(state.hand(Color::White).count(PieceType::Bishop), 1);
        assert_eq!(state.ply(), 11);
        assert_eq!(state.to_sfen(), text);

        let horse = "4k4/9/9/9/4+B4/9/9/9/4K4 w - 3";
        assert_eq!(GameState::from_sfen(horse).unwrap().to_sfen(), horse);
    }

    #[test]
    fn impossible_positions_are_rejected() {
        let cases = [
            "9/9/9/9/9/9/9/9/4K4 b - 1",                 // no white king
            "4k4/9/9/9/9/9/9/9/3KK4 b - 1",              // two black kings
            "4k4/9/9/9/4P4/9/4P4/9/4K4 b - 1",           // double pawn
            "P3k4/9/9/9/9/9/9/9/4K4 b - 1",              // pawn on the last rank
            "4k4/9/9/9/9/9/9/9/4K4 b 19P 1",             // too many pawns
            "4k4/4R4/9/9/9/9/9/9/4K4 b - 1",             // white in check with black to move
            "4k4/9/9/9/4+G4/9/9/9/4K4 b - 1",            // promoted gold
            "4k4/9/9/9/9/9/9/9/4K4 x - 1",               // bad side
            "4k4/9/9/9/9/9/9/4K4 b - 1",                 // eight ranks
        ];
        for text in cases {
            assert!(
                matches!(GameState::from_sfen(text), Err(ShogiError::MalformedInput(_))),
                "accepted {}",
                text
            );
        }
    }
}
