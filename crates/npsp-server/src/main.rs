//! NPSP API server binary.
//!
//! # Environment Variables
//! - `NPSP_ADDR`: Server address (default: "0.0.0.0:3000")
//! - `NPSP_DATABASE_PATH`: SQLite file (default: "npsp.db", `:memory:` for an ephemeral store)
//! - `NPSP_REQUEST_TIMEOUT_MS`: Request-level timeout for store work (default: 5000)
//! - `NPSP_BUSY_TIMEOUT_MS`: SQLite busy timeout (default: 2000)
//! - `NPSP_JOURNAL_MODE`: `wal` or `delete` (default: "wal")
//!
//! Variables may also come from a `.env` file in the working directory.

use npsp_server::{AppState, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "npsp_server=info,npsp_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        "-- Starting NPSP API (database: {}, request timeout: {} ms)",
        config.database_path.display(),
        config.request_timeout.as_millis()
    );

    let state = AppState::open(config)?;
    npsp_server::serve(state).await
}
