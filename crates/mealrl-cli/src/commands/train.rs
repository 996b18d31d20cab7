//! Offline training against the built-in grid environment

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use mealrl_rl::{
    AgentConfig, FrozenLake, OnlineAgent, RuleKind, SchemaKind, Trainer, TrainerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuleArg {
    Sarsa,
    QLearning,
}

impl From<RuleArg> for RuleKind {
    fn from(rule: RuleArg) -> Self {
        match rule {
            RuleArg::Sarsa => RuleKind::Sarsa,
            RuleArg::QLearning => RuleKind::QLearning,
        }
    }
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Environment id (frozen-lake, frozen-lake-slippery)
    #[arg(long, default_value = "frozen-lake")]
    pub env: String,

    #[arg(long, default_value_t = 10_000)]
    pub episodes: usize,

    #[arg(long, default_value_t = 200)]
    pub max_steps: usize,

    #[arg(long, default_value_t = 0.5)]
    pub alpha: f64,

    #[arg(long, default_value_t = 0.99)]
    pub gamma: f64,

    #[arg(long, default_value_t = 0.2)]
    pub epsilon: f64,

    #[arg(long, default_value_t = 0.9995)]
    pub epsilon_decay: f64,

    #[arg(long, default_value_t = 0.01)]
    pub min_epsilon: f64,

    /// Table file; training resumes from it if present
    #[arg(long, default_value = "sarsa_table.json")]
    pub save_path: PathBuf,

    /// Checkpoint every N episodes (0 = only at the end)
    #[arg(long, default_value_t = 500)]
    pub save_every: usize,

    /// Log the grid at every step
    #[arg(long)]
    pub render: bool,

    /// Keep epsilon fixed
    #[arg(long)]
    pub no_decay: bool,

    #[arg(long, value_enum, default_value_t = RuleArg::Sarsa)]
    pub rule: RuleArg,

    /// Seed for the agent and the environment
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            alpha: Some(self.alpha),
            gamma: Some(self.gamma),
            epsilon: Some(self.epsilon),
            schema: SchemaKind::Opaque,
            negative_reward_penalty: None,
            seed: self.seed,
            ..AgentConfig::for_rule(self.rule.into()).with_model_path(&self.save_path)
        }
    }

    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            episodes: self.episodes,
            max_steps: self.max_steps,
            decay_epsilon: !self.no_decay,
            epsilon_decay: self.epsilon_decay,
            min_epsilon: self.min_epsilon,
            save_every: self.save_every,
            render: self.render,
        }
    }
}

pub async fn run(args: TrainArgs) -> Result<()> {
    println!(
        "Training on env={} episodes={} max_steps={}",
        args.env, args.episodes, args.max_steps
    );

    let mut env = FrozenLake::from_id(&args.env, args.seed)?;
    let mut agent = OnlineAgent::new(&args.agent_config()).context("Failed to create agent")?;

    let report = Trainer::new(args.trainer_config())
        .run(&mut env, &mut agent)
        .await
        .context("Training failed")?;

    println!(
        "Training finished. Total reward {:.1} over {} episodes ({} aborted), final epsilon {:.4}",
        report.total_reward(),
        report.rewards.len(),
        report.aborted,
        report.final_epsilon
    );
    if report.failed_checkpoints > 0 {
        println!(
            "Warning: {} of {} checkpoint(s) failed to save",
            report.failed_checkpoints, report.checkpoints
        );
    }
    println!("Saved Q-table to {}", args.save_path.display());
    Ok(())
}
