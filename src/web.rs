#![cfg(not(tarpaulin_include))]

use maintenance::app;
use maintenance::config::Config;

/// Main entry point for the web application
///
/// Reads `.env`, the command line and the environment, then serves the API
/// on the configured address.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    app::run(config).await
}
