//! Offline Q-learning against the kitchen simulator over HTTP
//!
//! Protocol:
//! - `GET /recipes` -> `{recipes: [{recipe_id, ...}]}` (the action space)
//! - `POST /env/reset {available_ingredients}` -> state
//! - `POST /env/step {state_id, action_id}` -> `{reward, next_state: {state_id, done, ...}}`

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use mealrl_core::{ActionId, MealRlError};
use mealrl_rl::env::StepOutcome;
use mealrl_rl::{
    AgentConfig, Environment, OnlineAgent, RuleKind, SchemaKind, Trainer, TrainerConfig,
};

/// Ingredients sampled for each episode's starting pantry
pub const INGREDIENT_POOL: [&str; 12] = [
    "Egg",
    "Cooking oil",
    "Scallion",
    "Pork",
    "Beef",
    "Tomato",
    "Onion",
    "Garlic",
    "Rice",
    "Noodles",
    "Greens",
    "Fish sauce",
];

const MIN_INGREDIENTS: usize = 3;
const MAX_INGREDIENTS: usize = 7;

#[derive(Debug, Args)]
pub struct RemoteArgs {
    /// Kitchen simulator base URL
    #[arg(long, env = "MEALRL_ENV_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    #[arg(long, default_value_t = 100)]
    pub episodes: usize,

    #[arg(long, default_value_t = 50)]
    pub max_steps: usize,

    #[arg(long, default_value_t = 0.1)]
    pub alpha: f64,

    #[arg(long, default_value_t = 0.95)]
    pub gamma: f64,

    #[arg(long, default_value_t = 1.0)]
    pub epsilon_start: f64,

    #[arg(long, default_value_t = 0.1)]
    pub epsilon_end: f64,

    #[arg(long, default_value_t = 0.995)]
    pub epsilon_decay: f64,

    #[arg(long, default_value = "q_table.json")]
    pub save_path: PathBuf,

    /// Override the ingredient pool (repeatable)
    #[arg(long = "ingredient")]
    pub ingredients: Vec<String>,

    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RecipeList {
    recipes: Vec<Recipe>,
}

#[derive(Debug, Deserialize)]
struct Recipe {
    recipe_id: ActionId,
}

#[derive(Debug, Deserialize)]
struct StepResponse {
    reward: f64,
    next_state: Value,
}

/// Kitchen simulator client
pub struct KitchenEnv {
    client: Client,
    base_url: String,
    actions: Vec<ActionId>,
    pool: Vec<String>,
    state_id: Value,
    rng: StdRng,
}

impl KitchenEnv {
    /// Fetch the action space and build the client.
    pub async fn connect(
        base_url: &str,
        pool: Vec<String>,
        seed: Option<u64>,
    ) -> mealrl_core::Result<Self> {
        let client = Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();

        let recipes: RecipeList = client
            .get(format!("{base_url}/recipes"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(env_error)?
            .json()
            .await
            .map_err(env_error)?;

        let actions: Vec<ActionId> = recipes.recipes.into_iter().map(|r| r.recipe_id).collect();
        info!("Action space: {} recipe(s)", actions.len());

        Ok(Self {
            client,
            base_url,
            actions,
            pool,
            state_id: Value::Null,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        })
    }

    fn sample_pantry(&mut self) -> Vec<String> {
        let upper = MAX_INGREDIENTS.min(self.pool.len());
        let lower = MIN_INGREDIENTS.min(upper);
        let k = self.rng.gen_range(lower..=upper);
        self.pool
            .choose_multiple(&mut self.rng, k)
            .cloned()
            .collect()
    }

    async fn post(&self, path: &str, body: &Value) -> mealrl_core::Result<Value> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(env_error)?
            .json()
            .await
            .map_err(env_error)
    }
}

fn env_error(e: reqwest::Error) -> MealRlError {
    MealRlError::Environment(e.to_string())
}

#[async_trait]
impl Environment for KitchenEnv {
    fn name(&self) -> &str {
        "kitchen"
    }

    fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    async fn reset(&mut self) -> mealrl_core::Result<Value> {
        let pantry = self.sample_pantry();
        debug!("Reset with ingredients {:?}", pantry);
        let state = self
            .post("/env/reset", &json!({"available_ingredients": pantry}))
            .await?;
        self.state_id = state.get("state_id").cloned().unwrap_or(Value::Null);
        Ok(state)
    }

    async fn step(&mut self, action: ActionId) -> mealrl_core::Result<StepOutcome> {
        let raw = self
            .post(
                "/env/step",
                &json!({"state_id": self.state_id, "action_id": action}),
            )
            .await?;
        let step: StepResponse = serde_json::from_value(raw)?;

        let done = step
            .next_state
            .get("done")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.state_id = step
            .next_state
            .get("state_id")
            .cloned()
            .unwrap_or(Value::Null);

        Ok(StepOutcome {
            observation: step.next_state,
            reward: step.reward,
            done,
        })
    }
}

impl RemoteArgs {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            alpha: Some(self.alpha),
            gamma: Some(self.gamma),
            epsilon: Some(self.epsilon_start),
            schema: SchemaKind::Trainer,
            negative_reward_penalty: None,
            materialize_candidates: Some(false),
            seed: self.seed,
            ..AgentConfig::for_rule(RuleKind::QLearning).with_model_path(&self.save_path)
        }
    }

    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            episodes: self.episodes,
            max_steps: self.max_steps,
            decay_epsilon: true,
            epsilon_decay: self.epsilon_decay,
            min_epsilon: self.epsilon_end,
            save_every: 0,
            render: false,
        }
    }

    fn pool(&self) -> Vec<String> {
        if self.ingredients.is_empty() {
            INGREDIENT_POOL.iter().map(ToString::to_string).collect()
        } else {
            self.ingredients.clone()
        }
    }
}

pub async fn run(args: RemoteArgs) -> Result<()> {
    let mut env = KitchenEnv::connect(&args.base_url, args.pool(), args.seed)
        .await
        .with_context(|| format!("Failed to fetch action space from {}", args.base_url))?;
    let mut agent = OnlineAgent::new(&args.agent_config()).context("Failed to create agent")?;

    let report = Trainer::new(args.trainer_config())
        .run(&mut env, &mut agent)
        .await
        .context("Training failed")?;

    println!("\n--- Training complete ---");
    println!(
        "{} episode(s), {} aborted, {} step(s), final epsilon {:.4}",
        report.episodes, report.aborted, report.total_steps, report.final_epsilon
    );
    println!("Saved Q-table to {}", args.save_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Simulator stub: two recipes; every second step finishes the episode.
    async fn spawn_simulator() -> String {
        let steps = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/recipes",
                get(|| async { Json(json!({"recipes": [{"recipe_id": 11}, {"recipe_id": "12"}]})) }),
            )
            .route(
                "/env/reset",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "state_id": "s0",
                        "available_ingredients": body["available_ingredients"],
                        "context": {"meal_time": "dinner", "history": []},
                        "done": false
                    }))
                }),
            )
            .route(
                "/env/step",
                post(move |Json(body): Json<Value>| {
                    let steps = steps.clone();
                    async move {
                        let n = steps.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({
                            "reward": if body["action_id"] == 12 { 1.0 } else { -1.0 },
                            "next_state": {
                                "state_id": format!("s{n}"),
                                "available_ingredients": ["egg"],
                                "context": {"history": [{"recipe_id": body["action_id"]}]},
                                "done": n % 2 == 0
                            }
                        }))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_connect_reads_action_space() {
        let url = spawn_simulator().await;
        let env = KitchenEnv::connect(&url, vec!["Egg".to_string()], Some(1))
            .await
            .unwrap();
        assert_eq!(env.actions(), &[ActionId(11), ActionId(12)]);
    }

    #[tokio::test]
    async fn test_reset_samples_three_to_seven() {
        let url = spawn_simulator().await;
        let pool = INGREDIENT_POOL.iter().map(ToString::to_string).collect();
        let mut env = KitchenEnv::connect(&url, pool, Some(2)).await.unwrap();

        for _ in 0..20 {
            let state = env.reset().await.unwrap();
            let n = state["available_ingredients"].as_array().unwrap().len();
            assert!((3..=7).contains(&n), "sampled {n} ingredients");
        }
        assert_eq!(env.state_id, json!("s0"));
    }

    #[tokio::test]
    async fn test_step_tracks_state_and_done() {
        let url = spawn_simulator().await;
        let mut env = KitchenEnv::connect(&url, vec!["Egg".to_string()], None)
            .await
            .unwrap();
        env.reset().await.unwrap();

        let first = env.step(ActionId(12)).await.unwrap();
        assert_eq!(first.reward, 1.0);
        assert!(!first.done);
        assert_eq!(env.state_id, json!("s1"));

        let second = env.step(ActionId(11)).await.unwrap();
        assert_eq!(second.reward, -1.0);
        assert!(second.done);
    }

    #[tokio::test]
    async fn test_unreachable_simulator_is_environment_error() {
        let result = KitchenEnv::connect("http://127.0.0.1:9", vec![], None).await;
        assert!(matches!(result, Err(MealRlError::Environment(_))));
    }

    #[tokio::test]
    async fn test_training_run_against_stub() {
        let url = spawn_simulator().await;
        let dir = tempfile::tempdir().unwrap();
        let save_path = dir.path().join("q_table.json");
        let args = RemoteArgs {
            base_url: url,
            episodes: 5,
            max_steps: 10,
            alpha: 0.1,
            gamma: 0.95,
            epsilon_start: 1.0,
            epsilon_end: 0.1,
            epsilon_decay: 0.995,
            save_path: save_path.clone(),
            ingredients: vec![],
            seed: Some(3),
        };

        run(args).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&save_path).unwrap()).unwrap();
        // Unclamped Q-learning: negative rewards blend instead of -999
        let all_values: Vec<f64> = raw
            .as_object()
            .unwrap()
            .values()
            .flat_map(|row| row.as_object().unwrap().values().map(|v| v.as_f64().unwrap()).collect::<Vec<_>>())
            .collect();
        assert!(!all_values.is_empty());
        assert!(all_values.iter().all(|v| *v > -999.0));
    }
}
