//! Serving daemon: HTTP surface over one online agent

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use mealrl_core::ActionId;
use mealrl_rl::{AgentStats, OnlineAgent, Prediction, Transition};

use crate::config::Config;

/// Shared daemon state for API handlers
///
/// All agent access is serialized through one mutex; the table itself has
/// no internal locking.
#[derive(Clone)]
pub struct DaemonState {
    pub agent: Arc<Mutex<OnlineAgent>>,
}

impl DaemonState {
    pub fn new(agent: OnlineAgent) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
        }
    }
}

/// Main mealrl daemon
pub struct MealRlDaemon {
    config: Config,
    state: DaemonState,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl MealRlDaemon {
    /// Create the daemon and load the agent's table
    pub fn new(config: Config) -> Result<Self> {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let agent = OnlineAgent::new(&config.agent).context("Failed to initialize agent")?;

        Ok(Self {
            state: DaemonState::new(agent),
            config,
            shutdown: shutdown_tx,
        })
    }

    /// Serve until shutdown is requested
    pub async fn run(&self) -> Result<()> {
        info!("mealrl daemon running on {}", self.config.server.bind_address);

        let addr: std::net::SocketAddr = self
            .config
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address {}", self.config.server.bind_address))?;

        let app = create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let mut shutdown_rx = self.shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Stop accepting requests
    pub fn shutdown(&self) {
        info!("Shutting down daemon...");
        let _ = self.shutdown.send(());
    }
}

/// Create the API router with state
pub fn create_router(state: DaemonState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .route("/feedback", post(feedback))
        .route("/api/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// API Request/Response types

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub state: Value,
    /// Accepted for compatibility with the backend; one action is returned
    #[serde(default)]
    pub k: Option<usize>,
    pub possible_actions: Vec<ActionId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub state: Value,
    pub action: ActionId,
    pub reward: f64,
    pub next_state: Value,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
    pub status: String,
    pub message: String,
    pub td_error: f64,
}

/// Internal failure surfaced to clients without details
#[derive(Debug)]
pub struct InternalError;

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"detail": "Internal Server Error"})),
        )
            .into_response()
    }
}

// Handlers

async fn health_check() -> &'static str {
    "OK"
}

async fn predict(
    State(state): State<DaemonState>,
    Json(request): Json<PredictRequest>,
) -> Json<Prediction> {
    debug!(
        "Received /predict with {} candidate(s), k={:?}",
        request.possible_actions.len(),
        request.k
    );
    let mut agent = state.agent.lock().await;
    let prediction = agent.predict(&request.state, &request.possible_actions);
    debug!("Suggestion: {:?}", prediction.chosen);
    Json(prediction)
}

async fn feedback(
    State(state): State<DaemonState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, InternalError> {
    debug!(
        "Received /feedback for action {} with reward {}",
        request.action, request.reward
    );
    let transition = Transition::new(
        request.state,
        request.action,
        request.reward,
        request.next_state,
        request.done,
    );

    // learn() writes the table file, keep it off the async workers
    let agent = state.agent.clone();
    let joined = tokio::task::spawn_blocking(move || agent.blocking_lock().learn(&transition)).await;

    match joined {
        Ok(Ok(outcome)) => Ok(Json(FeedbackResponse {
            status: outcome.status,
            message: outcome.message,
            td_error: outcome.td_error,
        })),
        Ok(Err(e)) => {
            error!("Error while learning from feedback: {}", e);
            Err(InternalError)
        }
        Err(e) => {
            error!("Learning task failed: {}", e);
            Err(InternalError)
        }
    }
}

async fn stats(State(state): State<DaemonState>) -> Json<AgentStats> {
    Json(state.agent.lock().await.stats())
}
