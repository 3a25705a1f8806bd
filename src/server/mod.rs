//! HTTP service.
//!
//! Single-process server exposing:
//!
//! - `GET /` — embedded search page
//! - `POST /recommend` — JSON `{"text": …, "k": …}` → `{"results": […]}`
//! - `GET /health` — liveness probe
//! - `GET /static/…` — cover art, when the directory exists
//!
//! The server is started only after provisioning completed, so request
//! handling never touches the network: the model and index are already on
//! local disk. Exactly one process serves the port; concurrency within the
//! process is the runtime's.

pub mod assets;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::config::{ServiceConfig, DEFAULT_K};
use crate::recommend::Recommender;

pub struct ServerState {
    pub recommender: Recommender,
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    #[serde(default)]
    text: String,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    DEFAULT_K
}

/// Assemble the route tree. Split out from [`run`] so tests can drive the
/// filters without binding a socket.
pub fn routes(
    state: Arc<ServerState>,
    static_dir: PathBuf,
) -> impl Filter<Extract = impl Reply> + Clone {
    let with_state = warp::any().map(move || Arc::clone(&state));

    let home = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(assets::HOMEPAGE_HTML));

    let recommend = warp::path("recommend")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state)
        .and_then(handle_recommend);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "healthy"})));

    // Mounted unconditionally; a missing directory just 404s, same as not
    // mounting it at all.
    let static_files = warp::path("static").and(warp::fs::dir(static_dir));

    home.or(recommend)
        .or(health)
        .or(static_files)
        .recover(handle_rejection)
}

async fn handle_recommend(
    request: RecommendRequest,
    state: Arc<ServerState>,
) -> Result<warp::reply::Response, Infallible> {
    if request.text.trim().is_empty() {
        let reply = warp::reply::json(&json!({"error": "provide 'text' in JSON"}));
        return Ok(warp::reply::with_status(reply, StatusCode::BAD_REQUEST).into_response());
    }

    let text = request.text;
    let k = request.k;
    let worker_state = Arc::clone(&state);
    let outcome =
        tokio::task::spawn_blocking(move || worker_state.recommender.recommend(&text, k)).await;

    match outcome {
        Ok(Ok(results)) => {
            Ok(warp::reply::json(&json!({"results": results})).into_response())
        }
        Ok(Err(err)) => {
            error!(error = %err, "recommend_failed");
            let reply = warp::reply::json(&json!({"error": "recommendation failed"}));
            Ok(warp::reply::with_status(reply, StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
        Err(err) => {
            error!(error = %err, "recommend_worker_panicked");
            let reply = warp::reply::json(&json!({"error": "recommendation failed"}));
            Ok(warp::reply::with_status(reply, StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
    }
}

/// Map rejections to the JSON error shape the rest of the API uses.
async fn handle_rejection(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "invalid JSON body")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!(?rejection, "unhandled_rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    let reply = warp::reply::json(&json!({"error": message}));
    Ok(warp::reply::with_status(reply, status).into_response())
}

/// Bind and serve until ctrl-c. One worker process, one listener.
pub async fn run(config: &ServiceConfig, recommender: Recommender) -> Result<()> {
    let state = Arc::new(ServerState { recommender });
    let static_dir = config.static_dir.clone();
    let addr = config.bind_addr();

    let (bound, server) = warp::serve(routes(state, static_dir))
        .try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown_signal_received");
        })
        .with_context(|| format!("bind {addr}"))?;

    info!(addr = %bound, workers = 1, "server_listening");
    server.await;
    Ok(())
}
