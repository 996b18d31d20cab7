//! Training environments
//!
//! The trainer talks to environments through [`Environment`]. A grid world
//! ships here for offline experiments; the kitchen simulator client lives
//! in the CLI since it is the only thing that needs HTTP.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use mealrl_core::{ActionId, MealRlError, Result};

/// Result of one environment step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Value,
    pub reward: f64,
    pub done: bool,
}

/// An episodic environment with a fixed action space
#[async_trait]
pub trait Environment: Send {
    fn name(&self) -> &str;

    /// Every action the environment accepts
    fn actions(&self) -> &[ActionId];

    /// Start a new episode and return the first observation
    async fn reset(&mut self) -> Result<Value>;

    /// Apply `action` to the current episode
    async fn step(&mut self, action: ActionId) -> Result<StepOutcome>;

    /// Text rendering of the current state, if supported
    fn render(&self) -> Option<String> {
        None
    }
}

/// 4x4 frozen lake
///
/// `S` start, `F` frozen, `H` hole, `G` goal. Reaching `G` pays 1.0 and
/// ends the episode; falling into `H` ends it with 0.0. When slippery, the
/// agent moves in the intended direction a third of the time and to either
/// perpendicular direction otherwise.
pub struct FrozenLake {
    grid: Vec<Vec<u8>>,
    slippery: bool,
    position: usize,
    actions: Vec<ActionId>,
    rng: StdRng,
}

const LAKE_4X4: [&str; 4] = ["SFFF", "FHFH", "FFFH", "HFFG"];

pub const LEFT: ActionId = ActionId(0);
pub const DOWN: ActionId = ActionId(1);
pub const RIGHT: ActionId = ActionId(2);
pub const UP: ActionId = ActionId(3);

impl FrozenLake {
    pub fn new(slippery: bool, seed: Option<u64>) -> Self {
        Self {
            grid: LAKE_4X4.iter().map(|row| row.bytes().collect()).collect(),
            slippery,
            position: 0,
            actions: vec![LEFT, DOWN, RIGHT, UP],
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    /// Parse an environment id as accepted by the CLI
    pub fn from_id(id: &str, seed: Option<u64>) -> Result<Self> {
        match id.to_ascii_lowercase().as_str() {
            "frozen-lake" | "frozenlake" | "frozenlake-v1" => Ok(Self::new(false, seed)),
            "frozen-lake-slippery" | "frozenlake-slippery" => Ok(Self::new(true, seed)),
            other => Err(MealRlError::Environment(format!(
                "Unknown environment: {other}"
            ))),
        }
    }

    pub fn is_slippery(&self) -> bool {
        self.slippery
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn ncols(&self) -> usize {
        self.grid[0].len()
    }

    fn nrows(&self) -> usize {
        self.grid.len()
    }

    fn cell(&self, position: usize) -> u8 {
        self.grid[position / self.ncols()][position % self.ncols()]
    }

    fn moved(&self, position: usize, direction: i64) -> usize {
        let (mut row, mut col) = (position / self.ncols(), position % self.ncols());
        match direction {
            0 => col = col.saturating_sub(1),
            1 => row = (row + 1).min(self.nrows() - 1),
            2 => col = (col + 1).min(self.ncols() - 1),
            _ => row = row.saturating_sub(1),
        }
        row * self.ncols() + col
    }
}

#[async_trait]
impl Environment for FrozenLake {
    fn name(&self) -> &str {
        if self.slippery {
            "frozen-lake-slippery"
        } else {
            "frozen-lake"
        }
    }

    fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    async fn reset(&mut self) -> Result<Value> {
        self.position = 0;
        Ok(json!(self.position))
    }

    async fn step(&mut self, action: ActionId) -> Result<StepOutcome> {
        if !self.actions.contains(&action) {
            return Err(MealRlError::Environment(format!(
                "Invalid action {action} for {}",
                self.name()
            )));
        }

        let direction = if self.slippery {
            // intended, or one of the two perpendicular directions
            (action.value() + self.rng.gen_range(-1..=1)).rem_euclid(4)
        } else {
            action.value()
        };

        self.position = self.moved(self.position, direction);
        let (reward, done) = match self.cell(self.position) {
            b'G' => (1.0, true),
            b'H' => (0.0, true),
            _ => (0.0, false),
        };

        Ok(StepOutcome {
            observation: json!(self.position),
            reward,
            done,
        })
    }

    fn render(&self) -> Option<String> {
        let mut out = String::new();
        for (r, row) in self.grid.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                if r * self.ncols() + c == self.position {
                    out.push('@');
                } else {
                    out.push(cell as char);
                }
            }
            out.push('\n');
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reaching_goal_pays_one() {
        let mut env = FrozenLake::new(false, Some(1));
        assert_eq!(env.reset().await.unwrap(), json!(0));

        // Safe path: down, down, right, right, down, right
        let path = [DOWN, DOWN, RIGHT, RIGHT, DOWN, RIGHT];
        let mut last = None;
        for action in path {
            last = Some(env.step(action).await.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.reward, 1.0);
        assert!(last.done);
        assert_eq!(last.observation, json!(15));
    }

    #[tokio::test]
    async fn test_hole_ends_episode_without_reward() {
        let mut env = FrozenLake::new(false, None);
        env.reset().await.unwrap();
        env.step(RIGHT).await.unwrap();
        let outcome = env.step(DOWN).await.unwrap();
        assert_eq!(outcome.observation, json!(5));
        assert!(outcome.done);
        assert_eq!(outcome.reward, 0.0);
    }

    #[tokio::test]
    async fn test_walls_keep_agent_in_place() {
        let mut env = FrozenLake::new(false, None);
        env.reset().await.unwrap();
        let outcome = env.step(LEFT).await.unwrap();
        assert_eq!(outcome.observation, json!(0));
        let outcome = env.step(UP).await.unwrap();
        assert_eq!(outcome.observation, json!(0));
        assert!(!outcome.done);
    }

    #[tokio::test]
    async fn test_slippery_moves_are_not_backwards() {
        let mut env = FrozenLake::new(true, Some(3));
        for _ in 0..200 {
            env.reset().await.unwrap();
            // From the start, "down" may slip left (stay) or right, never up
            let outcome = env.step(DOWN).await.unwrap();
            let pos = outcome.observation.as_u64().unwrap();
            assert!(matches!(pos, 0 | 1 | 4), "unexpected position {pos}");
        }
    }

    #[tokio::test]
    async fn test_invalid_action_is_environment_error() {
        let mut env = FrozenLake::new(false, None);
        env.reset().await.unwrap();
        let err = env.step(ActionId(9)).await.unwrap_err();
        assert!(matches!(err, MealRlError::Environment(_)));
    }

    #[test]
    fn test_from_id_and_render() {
        let env = FrozenLake::from_id("frozen-lake-slippery", None).unwrap();
        assert!(env.is_slippery());
        assert!(FrozenLake::from_id("cartpole", None).is_err());

        let frame = FrozenLake::new(false, None).render().unwrap();
        assert_eq!(frame.lines().next(), Some("@FFF"));
        assert_eq!(frame.lines().count(), 4);
    }
}
