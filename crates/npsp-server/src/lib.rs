//! # NPSP Server
//!
//! HTTP API over [`npsp_core`].
//!
//! Handles:
//! - HTTP endpoints with axum
//! - configuration resolved once at startup
//! - structured error responses (`{"error", "kind"}`)
//! - request-level timeouts around store work

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/enroll", post(routes::enroll))
        .route("/form-progress", put(routes::form_progress))
        .route("/form-completion/:subject_id", get(routes::get_form_completion))
        .route("/subjects", get(routes::list_subjects))
        .route("/subjects/:subject_id", get(routes::get_subject))
        .route("/forms/:form", put(routes::update_form))
        .route("/forms/:form/batch", put(routes::update_form_batch))
        .route("/forms/:form/:subject_id", get(routes::get_form))
        .route("/users", get(routes::get_researcher))
        .route("/users/all", get(routes::list_researchers))
        .route("/users/next-serial", get(routes::next_serial))
        .route("/users/register", post(routes::register))
        .route("/users/login", post(routes::login))
        .route("/users/profile", put(routes::update_profile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.addr;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("NPSP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
