use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use shogi_ppo::{ActionSpaceMapper, GameState, RulesConfig};

/// Legal move generation and perft from the initial position
fn bench_movegen(c: &mut Criterion) {
    let game = GameState::new();
    c.bench_function("legal_moves_startpos", |b| {
        b.iter(|| black_box(&game).generate_legal_moves())
    });

    let mut group = c.benchmark_group("perft");
    for depth in [1u32, 2, 3] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &d| {
            b.iter(|| black_box(&game).perft(d))
        });
    }
    group.finish();
}

/// Uniformly random game including mask construction, as a collection worker sees it
fn bench_random_playout(c: &mut Criterion) {
    let mapper = ActionSpaceMapper::new();
    let rules = RulesConfig::default().with_max_moves(200);
    c.bench_function("random_playout_200", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| {
            let mut game = GameState::with_config(rules).expect("valid rules");
            while !game.is_terminal() {
                let moves = game.generate_legal_moves();
                let mask = mapper.legal_mask(&moves).expect("mask");
                black_box(&mask);
                let Some(&mv) = moves.choose(&mut rng) else {
                    break;
                };
                game.apply_move(mv).expect("generated move");
            }
            black_box(game.ply())
        })
    });
}

criterion_group!(benches, bench_movegen, bench_random_playout);
criterion_main!(benches);
