use std::sync::Arc;

use npsp_core::NpspCore;

use super::config::ServerConfig;

/// Shared by every handler. Created once at startup, dropped at shutdown.
#[derive(Clone)]
pub struct AppState {
    pub core: NpspCore,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(core: NpspCore, config: ServerConfig) -> Self {
        Self {
            core,
            config: Arc::new(config),
        }
    }

    /// Open the configured store.
    pub fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let core = NpspCore::open(&config.database_path, &config.store)?;
        Ok(Self::new(core, config))
    }
}
