//! RL Algorithm Benchmarks
//!
//! Hot paths of the serving agent:
//! 1. StateEncoder::encode() - every predict and learn call
//! 2. EpsilonGreedy::select() - every predict call
//! 3. UpdateRule::update() - every feedback call
//! 4. TableStore::save() - every feedback call, whole-table rewrite
//!
//! ## Performance Targets
//! - Encode: < 5µs per observation
//! - Predict: < 20µs for 50 candidates
//! - Update: < 5µs
//! - Save: roughly linear in table size

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use mealrl_core::{ActionId, Hyperparameters};
use mealrl_rl::{
    AgentConfig, EpsilonGreedy, KeyedTransition, OnlineAgent, QLearning, Sarsa, StateEncoder,
    TableStore, UpdateRule, ValueTable,
};

// ============================================================================
// Helpers
// ============================================================================

const INGREDIENTS: [&str; 12] = [
    "Egg", "Oil", "Scallion", "Pork", "Beef", "Tomato", "Onion", "Garlic", "Rice", "Noodles",
    "Greens", "Fish sauce",
];

fn observation(i: usize) -> Value {
    let avail: Vec<&str> = INGREDIENTS.iter().cycle().skip(i).take(3 + i % 5).copied().collect();
    json!({
        "avail": avail,
        "context": {"meal_time": if i % 2 == 0 { "lunch" } else { "dinner" }},
        "history": (0..i % 6).map(|h| json!({"recipeId": h})).collect::<Vec<_>>(),
    })
}

fn candidates(n: usize) -> Vec<ActionId> {
    (0..n as i64).map(ActionId).collect()
}

fn populated_table(states: usize, actions: usize) -> ValueTable {
    let encoder = StateEncoder::serving();
    let mut table = ValueTable::new();
    for i in 0..states {
        let key = encoder.encode(&observation(i));
        for a in 0..actions {
            table.set(&key, ActionId(a as i64), ((i * 31 + a * 7) % 100) as f64 / 100.0);
        }
    }
    table
}

fn keyed(i: usize, reward: f64) -> KeyedTransition {
    let encoder = StateEncoder::serving();
    KeyedTransition {
        state_key: encoder.encode(&observation(i)),
        action: ActionId((i % 20) as i64),
        reward,
        next_state_key: encoder.encode(&observation(i + 1)),
        done: false,
        next_action: None,
    }
}

// ============================================================================
// State Encoding Benchmarks
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let encoder = StateEncoder::serving();
    let obs = observation(4);

    c.bench_function("state/encode_serving", |b| {
        b.iter(|| encoder.encode(black_box(&obs)))
    });

    let opaque = StateEncoder::opaque();
    let grid = json!(7);
    c.bench_function("state/encode_opaque", |b| {
        b.iter(|| opaque.encode(black_box(&grid)))
    });
}

// ============================================================================
// Policy Benchmarks
// ============================================================================

fn bench_select(c: &mut Criterion) {
    let table = populated_table(200, 50);
    let key = StateEncoder::serving().encode(&observation(3));
    let policy = EpsilonGreedy::new(0.0);

    let mut group = c.benchmark_group("policy/select");
    for n in [5, 20, 50, 200] {
        let cands = candidates(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &cands, |b, cands| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| policy.select(&table, black_box(&key), black_box(cands), &mut rng))
        });
    }
    group.finish();
}

// ============================================================================
// Update Rule Benchmarks
// ============================================================================

fn bench_update(c: &mut Criterion) {
    let params = Hyperparameters::new(0.5, 0.9, 0.1);
    let transitions: Vec<KeyedTransition> = (0..100).map(|i| keyed(i, 1.0)).collect();

    c.bench_function("update/q_learning_100", |b| {
        let rule = QLearning::default();
        let mut table = populated_table(100, 20);
        b.iter(|| {
            for t in &transitions {
                black_box(rule.update(&mut table, t, &params));
            }
        })
    });

    c.bench_function("update/sarsa_approximate_100", |b| {
        let rule = Sarsa::with_actions(&candidates(20));
        let mut table = populated_table(100, 20);
        b.iter(|| {
            for t in &transitions {
                black_box(rule.update(&mut table, t, &params));
            }
        })
    });
}

// ============================================================================
// Agent / Persistence Benchmarks
// ============================================================================

fn bench_agent_predict(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AgentConfig::default()
        .with_model_path(dir.path().join("bench.json"))
        .with_seed(3);
    let mut agent = OnlineAgent::new(&config).expect("agent");
    let obs = observation(2);
    let cands = candidates(50);

    c.bench_function("agent/predict_50", |b| {
        b.iter(|| agent.predict(black_box(&obs), black_box(&cands)))
    });
}

fn bench_save(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut group = c.benchmark_group("persistence/save");
    group.sample_size(20);
    for states in [100, 1_000, 10_000] {
        let table = populated_table(states, 10);
        let store = TableStore::new(dir.path().join(format!("t{states}.json")));
        group.throughput(Throughput::Elements(table.entry_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(states), &table, |b, table| {
            b.iter(|| store.save(black_box(table)).expect("save"))
        });
    }
    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    name = encoding_benchmarks;
    config = Criterion::default();
    targets = bench_encode,
);

criterion_group!(
    name = policy_benchmarks;
    config = Criterion::default();
    targets = bench_select,
);

criterion_group!(
    name = update_benchmarks;
    config = Criterion::default();
    targets = bench_update,
);

criterion_group!(
    name = agent_benchmarks;
    config = Criterion::default();
    targets =
        bench_agent_predict,
        bench_save,
);

criterion_main!(
    encoding_benchmarks,
    policy_benchmarks,
    update_benchmarks,
    agent_benchmarks
);
