//! Episodic training loop
//!
//! Sequential: reset, then choose / step / update until the episode ends or
//! hits the step cap. An environment error abandons the current episode
//! and training moves on to the next one.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mealrl_core::{ActionId, MealRlError, Result};

use crate::agent::OnlineAgent;
use crate::algorithm::RuleKind;
use crate::env::Environment;
use crate::experience::Transition;

/// Training loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub episodes: usize,
    pub max_steps: usize,
    pub decay_epsilon: bool,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    /// Save every N episodes; 0 saves only at the end
    pub save_every: usize,
    pub render: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            episodes: 10_000,
            max_steps: 200,
            decay_epsilon: true,
            epsilon_decay: 0.9995,
            min_epsilon: 0.01,
            save_every: 500,
            render: false,
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub episodes: usize,
    /// Episodes cut short by an environment error
    pub aborted: usize,
    pub total_steps: usize,
    /// Total reward of each completed episode
    pub rewards: Vec<f64>,
    pub final_epsilon: f64,
    /// Periodic saves attempted, and how many of them failed
    pub checkpoints: usize,
    pub failed_checkpoints: usize,
}

impl TrainingReport {
    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }

    /// Mean reward over the last `n` completed episodes
    pub fn recent_average(&self, n: usize) -> f64 {
        let n = n.max(1).min(self.rewards.len());
        if n == 0 {
            return 0.0;
        }
        self.rewards[self.rewards.len() - n..].iter().sum::<f64>() / n as f64
    }
}

/// Drives an [`OnlineAgent`] through an [`Environment`]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Run every episode, then save the table.
    ///
    /// SARSA updates bootstrap from the action actually chosen for the next
    /// state, which then becomes the next step's action. Q-learning chooses
    /// afresh at every step.
    pub async fn run<E: Environment + ?Sized>(
        &self,
        env: &mut E,
        agent: &mut OnlineAgent,
    ) -> Result<TrainingReport> {
        let actions = env.actions().to_vec();
        if actions.is_empty() {
            return Err(MealRlError::Environment(format!(
                "{} has an empty action space",
                env.name()
            )));
        }

        let on_policy = agent.rule_kind() == RuleKind::Sarsa;
        let episodes = self.config.episodes;
        let progress_every = (episodes / 10).max(1);
        let mut report = TrainingReport {
            episodes,
            ..TrainingReport::default()
        };

        info!(
            "Training on {} for {} episodes (max {} steps, rule {})",
            env.name(),
            episodes,
            self.config.max_steps,
            agent.rule_kind().as_str()
        );

        for episode in 1..=episodes {
            let mut state = match env.reset().await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Reset failed, skipping episode {}: {}", episode, e);
                    report.aborted += 1;
                    continue;
                }
            };

            let mut pending: Option<ActionId> = None;
            let mut episode_reward = 0.0;
            let mut aborted = false;

            for _ in 0..self.config.max_steps {
                if self.config.render {
                    if let Some(frame) = env.render() {
                        info!("\n{}", frame);
                    }
                }

                let Some(action) = pending.take().or_else(|| choose(agent, &state, &actions))
                else {
                    break;
                };

                let outcome = match env.step(action).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Step failed, ending episode {}: {}", episode, e);
                        aborted = true;
                        break;
                    }
                };

                let mut transition = Transition::new(
                    state,
                    action,
                    outcome.reward,
                    outcome.observation.clone(),
                    outcome.done,
                );
                if on_policy {
                    pending = choose(agent, &outcome.observation, &actions);
                    if let Some(next) = pending {
                        transition = transition.with_next_action(next);
                    }
                }
                agent.apply(&transition);

                report.total_steps += 1;
                episode_reward += outcome.reward;
                state = outcome.observation;
                if outcome.done {
                    break;
                }
            }

            if self.config.decay_epsilon {
                let eps = agent.hyperparameters().epsilon;
                agent.set_epsilon((eps * self.config.epsilon_decay).max(self.config.min_epsilon));
            }

            if aborted {
                report.aborted += 1;
            } else {
                report.rewards.push(episode_reward);
            }

            if self.config.save_every > 0 && episode % self.config.save_every == 0 {
                report.checkpoints += 1;
                // The agent logs the cause; training continues and the final save decides.
                if agent.save().is_err() {
                    report.failed_checkpoints += 1;
                }
            }

            if episode % progress_every == 0 {
                info!(
                    "Episode {}/{} | reward {:.3} | avg_recent {:.3} | eps {:.4}",
                    episode,
                    episodes,
                    episode_reward,
                    report.recent_average((episodes / 20).max(1)),
                    agent.hyperparameters().epsilon
                );
            }
        }

        if report.failed_checkpoints > 0 {
            warn!(
                "{} of {} checkpoint(s) failed to save",
                report.failed_checkpoints, report.checkpoints
            );
        }
        agent.save()?;
        report.final_epsilon = agent.hyperparameters().epsilon;
        debug!("Training finished: {:?}", report);
        Ok(report)
    }
}

fn choose(agent: &mut OnlineAgent, state: &serde_json::Value, actions: &[ActionId]) -> Option<ActionId> {
    agent.predict(state, actions).chosen
}
