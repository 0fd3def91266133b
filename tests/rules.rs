use rand::prelude::*;
use shogi_ppo::{
    ActionSpaceMapper, Color, GameOutcome, GameState, IllegalReason, Move, MoveVerdict, Piece,
    PieceType, RulesConfig, ShogiError, Square, ACTION_SPACE_SIZE,
};

fn usi(text: &str) -> Move {
    Move::from_usi(text).unwrap()
}

fn play(game: &mut GameState, moves: &[&str]) -> GameOutcome {
    let mut outcome = GameOutcome::Continuing;
    for m in moves {
        outcome = game.apply_move(usi(m)).unwrap();
    }
    outcome
}

#[test]
fn perft_from_the_initial_position() {
    let game = GameState::new();
    assert_eq!(game.perft(1), 30);
    assert_eq!(game.perft(2), 900);
    assert_eq!(game.perft(3), 25_470);
}

#[test]
fn fourth_occurrence_is_a_repetition_draw() {
    let mut game = GameState::new();
    let cycle = ["2h3h", "8b7b", "3h2h", "7b8b"];
    for round in 0..2 {
        assert_eq!(play(&mut game, &cycle), GameOutcome::Continuing, "round {}", round);
    }
    assert_eq!(game.repetition_count(), 3);
    assert_eq!(play(&mut game, &cycle[..3]), GameOutcome::Continuing);
    assert_eq!(game.apply_move(usi(cycle[3])).unwrap(), GameOutcome::RepetitionDraw);
    assert_eq!(game.ply(), 12);
    assert!(game.is_terminal());
    assert!(game.generate_legal_moves().is_empty());
}

#[test]
fn repetition_threshold_is_configurable() {
    let rules = RulesConfig::default().with_repetition_threshold(2);
    let mut game = GameState::with_config(rules).unwrap();
    let outcome = play(&mut game, &["2h3h", "8b7b", "3h2h", "7b8b"]);
    assert_eq!(outcome, GameOutcome::RepetitionDraw);
}

#[test]
fn threshold_of_one_is_refused() {
    let rules = RulesConfig::default().with_repetition_threshold(1);
    assert!(matches!(GameState::with_config(rules), Err(ShogiError::Config(_))));
}

#[test]
fn move_limit_ends_the_game() {
    let mut game = GameState::with_config(RulesConfig::default().with_max_moves(3)).unwrap();
    assert_eq!(play(&mut game, &["7g7f", "3c3d"]), GameOutcome::Continuing);
    assert_eq!(game.apply_move(usi("2g2f")).unwrap(), GameOutcome::MoveLimitReached);
    let err = game.apply_move(usi("8c8d")).unwrap_err();
    assert!(matches!(err, ShogiError::TerminalStateViolation { .. }));
}

#[test]
fn drop_pawn_mate_is_illegal_but_pawn_check_is_fine() {
    let mated = GameState::from_sfen("7lk/7p1/7G1/9/9/9/9/9/4K4 b P 1").unwrap();
    assert_eq!(
        mated.check_move(usi("P*1b")).unwrap(),
        MoveVerdict::Illegal(IllegalReason::DropPawnMate)
    );
    assert!(!mated.generate_legal_moves().contains(&usi("P*1b")));

    // the king can step out to 2a once the lance is gone
    let escape = GameState::from_sfen("8k/7p1/7G1/9/9/9/9/9/4K4 b P 1").unwrap();
    assert!(escape.generate_legal_moves().contains(&usi("P*1b")));
}

#[test]
fn tokin_does_not_block_a_pawn_drop_on_its_file() {
    let game = GameState::from_sfen("4k4/9/9/9/9/9/4+P4/9/4K4 b P 1").unwrap();
    assert_eq!(game.check_move(usi("P*5e")).unwrap(), MoveVerdict::Legal);
    assert!(game.generate_legal_moves().contains(&usi("P*5e")));

    let doubled = GameState::from_sfen("4k4/9/9/9/9/9/4P4/9/4K4 b P 1").unwrap();
    assert_eq!(
        doubled.check_move(usi("P*5e")).unwrap(),
        MoveVerdict::Illegal(IllegalReason::DoublePawn)
    );
    assert!(!doubled.generate_legal_moves().contains(&usi("P*5e")));
}

#[test]
fn captured_tokin_goes_to_hand_as_a_pawn() {
    let mut game = GameState::from_sfen("4k4/9/9/9/9/9/4+p4/4G4/4K4 b - 1").unwrap();
    assert_eq!(game.apply_move(usi("5h5g")).unwrap(), GameOutcome::Continuing);
    assert_eq!(game.hand(Color::Black).count(PieceType::Pawn), 1);
    assert_eq!(
        game.piece_at(Square::from_usi("5g").unwrap()),
        Some(Piece::new(PieceType::Gold, Color::Black))
    );
    assert_eq!(game.to_sfen(), "4k4/9/9/9/9/9/4G4/9/4K4 w P 2");
}

#[test]
fn scholars_mate_by_gold_drop() {
    let mut game = GameState::from_sfen("4k4/9/4P4/9/9/9/9/9/4K4 b G 1").unwrap();
    let outcome = game.apply_move(usi("G*5b")).unwrap();
    assert_eq!(outcome, GameOutcome::Checkmate { winner: Color::Black });
    assert_eq!(outcome.winner(), Some(Color::Black));
}

#[test]
fn illegal_move_reports_the_position() {
    let mut game = GameState::new();
    let before = game.to_sfen();
    match game.apply_move(usi("5i5g")) {
        Err(ShogiError::IllegalMove { sfen, .. }) => assert_eq!(sfen, before),
        other => panic!("expected IllegalMove, got {:?}", other),
    }
    assert_eq!(game.to_sfen(), before);
    assert_eq!(game.ply(), 0);
}

#[test]
fn random_games_keep_every_invariant() {
    let mapper = ActionSpaceMapper::new();
    let initial_material = GameState::new().position().material_counts();
    let mut rng = StdRng::seed_from_u64(2024);

    for _ in 0..8 {
        let mut game = GameState::with_config(RulesConfig::default().with_max_moves(160)).unwrap();
        loop {
            let moves = game.generate_legal_moves();
            if moves.is_empty() {
                break;
            }
            let mask = mapper.legal_mask(&moves).unwrap();
            assert_eq!(mask.len(), ACTION_SPACE_SIZE);
            assert_eq!(mask.iter().filter(|&&b| b).count(), moves.len());

            let mv = *moves.choose(&mut rng).unwrap();
            let action = mapper.move_to_action(mv).unwrap();
            assert_eq!(mapper.action_to_move(action).unwrap(), mv);

            let outcome = game.apply_move(mv).unwrap();

            // a reloaded position passes full validation, including that the
            // side that just moved is not in check, and hashes identically
            let reloaded = GameState::from_sfen(&game.to_sfen()).unwrap();
            assert_eq!(reloaded.hash(), game.hash());
            assert_eq!(game.position().material_counts(), initial_material);

            if outcome.is_terminal() {
                break;
            }
        }
        assert!(game.is_terminal());
    }
}

#[test]
fn every_action_index_round_trips() {
    let mapper = ActionSpaceMapper::new();
    assert_eq!(mapper.total_actions(), ACTION_SPACE_SIZE);
    for action in 0..mapper.total_actions() {
        let mv = mapper.action_to_move(action).unwrap();
        assert_eq!(mapper.move_to_action(mv).unwrap(), action);
    }
    assert!(mapper.action_to_move(ACTION_SPACE_SIZE).is_err());
}

#[test]
fn sfen_round_trip_after_captures() {
    let mut game = GameState::new();
    play(&mut game, &["7g7f", "3c3d", "8h2b+", "3a2b"]);
    let sfen = game.to_sfen();
    assert_eq!(
        sfen,
        "lnsgkg1nl/1r5s1/pppppp1pp/6p2/9/2P6/PP1PPPPPP/7R1/LNSGKGSNL b Bb 5"
    );
    let reloaded = GameState::from_sfen(&sfen).unwrap();
    assert_eq!(reloaded.to_sfen(), sfen);
    assert_eq!(reloaded.generate_legal_moves(), game.generate_legal_moves());
}
