//! # Jwker Controller
//!
//! Binary entry point. See the library documentation for what the controller does.

use anyhow::Result;
use jwker_controller::runtime::initialization::initialize;
use jwker_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.config.max_concurrent_reconciles,
    )
    .await;

    Ok(())
}
