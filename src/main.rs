//! Support Chat server
//!
//! Serves the chat API, the streaming relay and the static pages.

use anyhow::Result;
use tracing::info;

use support_chat::config::AppConfig;
use support_chat::server::run_server;
use support_chat::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _telemetry = init_telemetry(config.log_dir.as_deref())?;

    info!(
        "Starting support chat (database: {}, backend: {})",
        config.database_path.display(),
        config.backend_url
    );
    run_server(config).await
}
