//! Stream Client Main Entry Point
//!
//! Thin glue around the streaming session: logging setup, configuration
//! loading, and a clean-shutdown wait on Ctrl-C.

use fx_stream_client::{Config, StreamSession};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Starting stream client");

    // Load configuration
    let config = Config::load_or_default();
    config.log_config();

    // Configuration faults are fatal before any connection attempt
    let mut session = match StreamSession::new(config) {
        Ok(session) => session,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = session.run() => match result {
            Ok(()) => log::info!("Session closed"),
            Err(e) => {
                log::error!("Session error: {}", e);
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupt received, shutting down");
        }
    }
}
