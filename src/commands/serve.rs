//! `serve` command: run the status/metrics HTTP surface

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::server::{start_with_shutdown, AppState};
use crate::storage::Stores;

pub async fn execute(addr: String, config: Config) -> Result<()> {
    let stores = Stores::sqlite(&config.database.sqlite_path)?;
    let state = AppState { stores };

    start_with_shutdown(&addr, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
}
