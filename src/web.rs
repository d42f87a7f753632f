#![cfg(not(tarpaulin_include))]

use pivotboard::{app, config::Settings, logging};

/// Main entry point for the dashboard server
///
/// Reads settings from the environment (and `.env`), configures JSON logging and
/// serves the dashboard API until the process is stopped.
///
/// # Environment
/// * `PAGES_DIR` - Directory with one `data_sources.yml` per dashboard
/// * `STORAGE_ROOT`, `S3_BUCKET` - Where dataset files live
/// * `BASIC_AUTH_USERNAME`, `BASIC_AUTH_PASSWORD` - Credentials for every route
/// * `BIND_ADDR` - Listen address, `127.0.0.1:3000` by default
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    logging::setup_logging();

    log::info!(
        "serving dashboards from {} (bucket {})",
        settings.pages_dir.display(),
        settings.s3_bucket
    );
    app::run(settings).await
}
