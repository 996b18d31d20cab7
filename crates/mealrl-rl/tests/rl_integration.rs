//! Integration tests for the online agent
//!
//! These tests drive the agent through its public API against real files.

#![allow(clippy::float_cmp)]

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use serde_json::{json, Value};

use mealrl_core::{ActionId, MealRlError};
use mealrl_rl::lock::{lock_path_for, FileLock};
use mealrl_rl::persistence::LEGACY_TABLE_FILE;
use mealrl_rl::{
    AgentConfig, OnlineAgent, RuleKind, SelectionLabel, TableStore, Transition, ValueTable,
};

fn serving_state(avail: &[&str], meal_time: Option<&str>, history: &[i64]) -> Value {
    let mut state = json!({
        "avail": avail,
        "history": history.iter().map(|id| json!({"recipeId": id})).collect::<Vec<_>>(),
    });
    if let Some(meal_time) = meal_time {
        state["context"] = json!({"meal_time": meal_time});
    }
    state
}

fn agent_at(path: &std::path::Path, rule: RuleKind, seed: u64) -> OnlineAgent {
    let config = AgentConfig::for_rule(rule)
        .with_model_path(path)
        .with_seed(seed);
    OnlineAgent::new(&config).unwrap()
}

fn ids(raw: &[i64]) -> Vec<ActionId> {
    raw.iter().copied().map(ActionId).collect()
}

/// Feedback survives a restart
#[test]
fn test_learn_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q_table_online.json");
    let s = serving_state(&["Egg", "rice"], Some("dinner"), &[1, 2]);
    let next = serving_state(&["egg"], Some("dinner"), &[1, 2, 7]);

    {
        let mut agent = agent_at(&path, RuleKind::QLearning, 1);
        agent
            .learn(&Transition::new(s.clone(), ActionId(7), 1.0, next.clone(), false))
            .unwrap();
        agent
            .learn(&Transition::new(next.clone(), ActionId(3), -1.0, s.clone(), false))
            .unwrap();
    }

    let mut reloaded = agent_at(&path, RuleKind::QLearning, 2);
    reloaded.set_epsilon(0.0);

    let p = reloaded.predict(&s, &ids(&[3, 7]));
    assert_eq!(p.chosen, Some(ActionId(7)));
    assert_eq!(p.label, SelectionLabel::Exploitation);
    assert_eq!(p.q_values["7"], 0.5);

    let p = reloaded.predict(&next, &ids(&[3]));
    assert_eq!(p.q_values["3"], -999.0);
}

/// Permuted and re-cased ingredient lists land on the same row
#[test]
fn test_equivalent_states_share_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_at(&dir.path().join("t.json"), RuleKind::QLearning, 3);
    agent.set_epsilon(0.0);

    let a = serving_state(&["Tomato", "egg", "RICE"], None, &[]);
    let b = serving_state(&["rice", "TOMATO", "Egg"], Some("lunch"), &[]);
    agent.apply(&Transition::new(a, ActionId(5), 1.0, json!({}), true));

    let p = agent.predict(&b, &ids(&[4, 5]));
    assert_eq!(p.chosen, Some(ActionId(5)));
    assert_eq!(agent.table().len(), 1);
}

/// String and integer action ids address the same entry
#[test]
fn test_string_and_integer_action_ids_merge() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_at(&dir.path().join("t.json"), RuleKind::QLearning, 4);
    let s = serving_state(&["egg"], None, &[]);

    let as_string: Transition = serde_json::from_value(json!({
        "state": s, "action": "12", "reward": 1.0, "next_state": s, "done": true
    }))
    .unwrap();
    let as_int: Transition = serde_json::from_value(json!({
        "state": s, "action": 12, "reward": 1.0, "next_state": s, "done": true
    }))
    .unwrap();

    agent.apply(&as_string);
    agent.apply(&as_int);

    assert_eq!(agent.table().entry_count(), 1);
    assert_eq!(agent.table().get(&agent.encoder().encode(&s), ActionId(12)), 0.75);
}

/// Empty table: every candidate is reachable with the no-experience label
#[test]
fn test_fallback_distribution_through_agent() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_at(&dir.path().join("t.json"), RuleKind::QLearning, 5);
    agent.set_epsilon(0.0);
    let s = serving_state(&["egg"], None, &[]);
    let cands = ids(&[1, 2, 3]);

    let mut counts: HashMap<ActionId, usize> = HashMap::new();
    for _ in 0..3000 {
        let p = agent.predict(&s, &cands);
        assert_eq!(p.label, SelectionLabel::FallbackNoExperience);
        *counts.entry(p.chosen.unwrap()).or_default() += 1;
    }
    for action in &cands {
        let n = counts[action];
        assert!((800..1200).contains(&n), "action {action} chosen {n} times");
    }
}

/// Constructing an agent migrates the legacy file and drops the dependency on it
#[test]
fn test_legacy_migration_via_agent() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join(LEGACY_TABLE_FILE);
    let legacy_body = r#"{"state-a": {"1": 0.25, "2": 1.5}, "state-b": {"9": -999.0}}"#;
    fs::write(&legacy, legacy_body).unwrap();

    let primary = dir.path().join("sarsa_table.json");
    let agent = agent_at(&primary, RuleKind::Sarsa, 6);
    assert_eq!(agent.table().len(), 2);
    assert!(primary.exists());

    let expected = mealrl_rl::persistence::from_value(&serde_json::from_str(legacy_body).unwrap())
        .unwrap();
    let migrated = TableStore::new(&primary).with_legacy_paths(Vec::<&str>::new()).load().unwrap();
    assert_eq!(migrated, expected);

    fs::remove_file(&legacy).unwrap();
    let again = agent_at(&primary, RuleKind::Sarsa, 7);
    assert_eq!(again.table(), &expected);
}

/// A migration save blocked by the lock keeps the legacy rows, and the next
/// successful learn writes all of them to the primary file
#[test]
fn test_blocked_legacy_migration_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(LEGACY_TABLE_FILE),
        r#"{"state-a": {"1": 0.25, "2": 1.5}}"#,
    )
    .unwrap();
    let primary = dir.path().join("q_table_online.json");
    let config = AgentConfig {
        lock_timeout_ms: 20,
        ..AgentConfig::default().with_model_path(&primary).with_seed(4)
    };

    let held = FileLock::acquire(&lock_path_for(&primary), Duration::from_secs(1)).unwrap();
    let mut agent = OnlineAgent::new(&config).unwrap();
    assert_eq!(agent.table().len(), 1);
    assert!(!primary.exists());
    drop(held);

    let s = serving_state(&["egg"], None, &[]);
    agent
        .learn(&Transition::new(s.clone(), ActionId(3), 1.0, s, true))
        .unwrap();

    // The primary file now exists, so the restart reads only it
    let restarted = OnlineAgent::new(&config).unwrap();
    assert_eq!(restarted.table().get("state-a", ActionId(2)), 1.5);
    assert_eq!(restarted.table().len(), 2);
}

/// An existing but unreadable table fails construction rather than
/// starting empty and being overwritten
#[test]
fn test_unreadable_table_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.json");
    fs::create_dir(&path).unwrap();

    let config = AgentConfig::default().with_model_path(&path);
    assert!(OnlineAgent::new(&config).is_err());
}

/// A corrupt table file starts the agent empty instead of failing
#[test]
fn test_corrupt_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.json");
    fs::write(&path, "{{{ not json").unwrap();

    let mut agent = agent_at(&path, RuleKind::QLearning, 8);
    assert!(agent.table().is_empty());

    // The next successful learn overwrites the corrupt file
    let s = serving_state(&["egg"], None, &[]);
    agent
        .learn(&Transition::new(s.clone(), ActionId(1), 1.0, s, true))
        .unwrap();
    let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw.is_object());
}

/// A stuck lock holder fails the save but keeps the in-memory update
#[test]
fn test_lock_timeout_keeps_in_memory_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.json");
    let config = AgentConfig {
        lock_timeout_ms: 50,
        ..AgentConfig::default().with_model_path(&path).with_seed(9)
    };
    let mut agent = OnlineAgent::new(&config).unwrap();

    let _held = FileLock::acquire(&lock_path_for(&path), Duration::from_secs(1)).unwrap();
    let s = serving_state(&["egg"], None, &[]);
    let err = agent
        .learn(&Transition::new(s.clone(), ActionId(1), 1.0, s.clone(), true))
        .unwrap_err();

    assert!(matches!(err, MealRlError::LockTimeout { .. }));
    assert!(err.is_persistence());
    assert_eq!(agent.table().get(&agent.encoder().encode(&s), ActionId(1)), 0.5);
    assert_eq!(agent.stats().save_failures, 1);
    assert!(!path.exists());
}

/// SARSA serving variant: next action approximated from the known universe
#[test]
fn test_sarsa_agent_feedback_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = agent_at(&dir.path().join("sarsa.json"), RuleKind::Sarsa, 10);
    agent.set_alpha(0.5);
    agent.set_epsilon(0.0);

    let s = serving_state(&["egg"], None, &[]);
    let next = serving_state(&["egg"], None, &[4]);

    // Materializes zeros for both candidates and learns 4 is good in `next`
    agent.predict(&next, &ids(&[4, 5]));
    agent.apply(&Transition::new(next.clone(), ActionId(4), 2.0, next.clone(), true));

    let outcome = agent
        .learn(&Transition::new(s.clone(), ActionId(4), 0.0, next.clone(), false))
        .unwrap();

    // target = 0 + 0.99 * Q(next, 4) = 0.99 * 1.0
    assert!((outcome.td_error - 0.99).abs() < 1e-12);
    assert!((outcome.new_value - 0.495).abs() < 1e-12);
}

/// Round trip keeps every value to 1e-9
#[test]
fn test_store_round_trip_many_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = TableStore::new(dir.path().join("big.json")).with_atomic_writes(true);
    let mut table = ValueTable::new();
    for s in 0..200 {
        for a in 0..15 {
            table.set(&format!("state-{s}"), ActionId(a), (s as f64).sin() * (a as f64 + 0.1) / 7.0);
        }
    }

    store.save(&table).unwrap();
    let loaded = store.load().unwrap();

    assert_eq!(loaded.entry_count(), table.entry_count());
    for (key, row) in table.iter() {
        for (action, value) in row {
            assert!((loaded.get(key, *action) - value).abs() < 1e-9);
        }
    }
}
