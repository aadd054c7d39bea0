use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};
use std::time::Duration;

use transcription_router::app::AppContext;
use transcription_router::config::AppConfig;
use transcription_router::config_loader::{config_file_path, load_config};
use transcription_router::config_validator::ConfigValidator;
use transcription_router::handlers;

const KEEP_ALIVE_SECONDS: u64 = 75;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if std::env::args().any(|arg| arg == "--sample-config") {
        print!("{}", ConfigValidator::generate_sample_config());
        return Ok(());
    }

    if !load_config() {
        info!(
            "No configuration file at {}, using environment and defaults",
            config_file_path().display()
        );
    }

    let validation = ConfigValidator::validate_env();
    validation.print_summary();
    if !validation.is_valid() {
        error!("Invalid configuration, refusing to start");
        std::process::exit(1);
    }

    let config = AppConfig::from_env();
    if let Err(e) = config.handler.ensure_temp_dir() {
        warn!("Failed to create temp directory {}: {}", config.handler.temp_dir, e);
    }

    let app = match AppContext::build(config.clone()).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to set up routing: {}", e);
            std::process::exit(1);
        }
    };
    let _background = app.start().await;

    let host = config.server.host.clone();
    let port = config.server.port;
    info!("Starting transcription router on http://{}:{}", host, port);
    info!("Using temp directory: {}", config.handler.temp_dir);
    info!("Metrics exporter: {}", config.metrics.exporter_type);

    let data = web::Data::new(app.clone());
    let result = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .client_disconnect_timeout(Duration::from_secs(config.handler.sync_request_timeout))
    .keep_alive(Duration::from_secs(KEEP_ALIVE_SECONDS))
    .run()
    .await;

    info!("HTTP server stopped, draining the queue");
    app.shutdown().await;
    result
}
