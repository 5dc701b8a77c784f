use anyhow::Result;
use peerhub::{HubConfig, PeerHub};
use peerhub_suite::bin_common::{load_config_from_env, ConfigType};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load config first (before logging is initialized)
    let config_path = load_config_from_env(ConfigType::Hub);
    let config = if config_path.exists() {
        HubConfig::from_yaml_file(&config_path)?
    } else {
        HubConfig::default()
    };

    peerhub::logging::init_tracing_with_level(&config.log_level);
    config.log();

    print_banner(&config);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    let hub = PeerHub::new(config);

    tokio::select! {
        _ = Arc::clone(&hub).run(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received");
            hub.shutdown();
        }
    }

    print_shutdown();
    Ok(())
}

fn print_banner(config: &HubConfig) {
    info!("");
    info!("========================================");
    info!("Starting PeerHub Server");
    info!("Listening on: {}", config.listen_addr);
    info!("Press Ctrl+C to stop");
    info!("========================================");
    info!("");
}

fn print_shutdown() {
    info!("");
    info!("PeerHub server stopped gracefully");
    info!("");
}
