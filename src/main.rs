use color_eyre::{eyre::eyre, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mqttmonitor::config::MonitorConfig;
use mqttmonitor::console::{render_publishers, Console};
use mqttmonitor::mqtt::MqttHandle;
use mqttmonitor::store::IngestionBridge;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let (config, path, created) = setup_config().await?;
    setup_logging(config.logging.tracing_level());
    if created {
        info!("Wrote default config to {}", path.display());
    }
    info!("Loaded config from {}", path.display());

    let bridge = IngestionBridge::new(config.store.capacity)
        .map_err(|e| eyre!("Failed to create message store: {}", e))?;
    bridge.set_filter(config.filter.text.clone(), config.filter.selected_publisher());

    let cancel = CancellationToken::new();

    // subscribe before the transport starts so no message is missed
    let console = Console::new(bridge.clone(), std::io::stdout().is_terminal());
    let console_task = console.spawn(cancel.clone());

    let (_transport, transport_task) = MqttHandle::spawn(
        config.broker.clone(),
        &config.subscriptions,
        bridge.clone(),
        cancel.clone(),
    )
    .map_err(|e| eyre!("Failed to start MQTT transport: {}", e))?;

    info!("Monitoring {} (Ctrl-C to stop)", config.broker);
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    let link = transport_task.await?;
    let printed = console_task.await?;

    info!(
        "Received {} messages, printed {}, {} transport errors",
        link.messages_received, printed, link.errors
    );
    println!("{}", bridge.stats());
    print!("{}", render_publishers(&bridge.publishers()));
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Loads the config named on the command line, or the default one
///
/// Runs before logging is installed, so the caller logs the returned path and whether
/// a default file was written.
async fn setup_config() -> Result<(MonitorConfig, PathBuf, bool)> {
    let (path, created) = match std::env::args_os().nth(1) {
        Some(path) => (PathBuf::from(path), false),
        None => {
            let path = MonitorConfig::default_path()?;
            let created = MonitorConfig::ensure_default_config(&path).await?;
            (path, created)
        }
    };
    let config = MonitorConfig::load(&path).await?;
    Ok((config, path, created))
}
