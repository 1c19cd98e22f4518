use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use nefitd::Config;
use nefitd::Engine;
use nefitd::Event;
use nefitd::integrations::nefit_easy::BridgeClientFactory;
use nefitd::integrations::nefit_easy::Credentials;
use nefitd::integrations::nefit_easy::pair;
use tokio::sync::broadcast;
use tokio::sync::oneshot;

#[derive(Debug, Parser)]
#[command(version, about = "Nefit Easy thermostat daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon
    Run {
        #[arg(short, long, default_value = "nefitd.toml")]
        config: PathBuf,

        /// Poll every device at a short fixed interval
        #[arg(long)]
        debug: bool,
    },

    /// Check credentials for a new device and print its configuration
    Pair {
        #[arg(short, long, default_value = "nefitd.toml")]
        config: PathBuf,

        /// Id for the new device
        device: String,

        #[arg(long)]
        serial_number: String,

        #[arg(long)]
        access_key: String,

        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, debug } => run(config, debug).await,
        Command::Pair {
            config,
            device,
            serial_number,
            access_key,
            password,
        } => {
            let credentials = Credentials {
                serial_number,
                access_key,
                password,
            };
            pair_device(config, device, credentials).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn run(config_path: PathBuf, debug: bool) -> anyhow::Result<()> {
    let mut config = load_config(&config_path)?;
    config.system.debug |= debug;

    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .init();

    tracing::info!("nefitd starting");
    tracing::info!("Loaded config from: {}", config_path.display());
    if config.system.debug {
        tracing::info!("Debug mode enabled, devices are polled every 10s");
    }

    let mut engine = Engine::new();
    if let Some(state_file) = &config.system.state_file {
        engine = engine.with_state_file(state_file.clone());
    }
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    let runner = engine.clone();
    let engine_handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Engine failed: {}", e);
        }
    });

    tokio::spawn(log_events(engine.subscribe()));

    let (api_shutdown_tx, api_shutdown_rx) = oneshot::channel();
    let api_handle = config.api.as_ref().map(|api| {
        let (listen, port) = (api.listen.clone(), api.port);
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = nefitd::api::serve(listen, port, engine, api_shutdown_rx).await {
                tracing::error!("HTTP API server failed: {}", e);
            }
        })
    });

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some(handle) = api_handle {
        let _ = api_shutdown_tx.send(());
        let _ = handle.await;
    }
    engine.shutdown().await;
    engine_handle.abort();

    tracing::info!("nefitd shutdown complete");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(Event::PressureAlarmActivated {
                device_id,
                pressure,
            }) => {
                tracing::warn!(
                    target: "nefitd::alarm",
                    "[{}] System pressure {} bar is outside the configured range",
                    device_id,
                    pressure
                );
            }
            Ok(event) => {
                if let Ok(json) = serde_json::to_string(&event) {
                    tracing::trace!(target: "nefitd::events", "{}", json);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event logger missed {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn pair_device(
    config_path: PathBuf,
    device: String,
    credentials: Credentials,
) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_writer(std::io::stderr)
        .init();

    let nefit_easy = config
        .integrations
        .nefit_easy
        .clone()
        .unwrap_or_default();
    if nefit_easy.devices.contains_key(&device) {
        anyhow::bail!("device '{}' is already configured", device);
    }

    let factory = BridgeClientFactory::new(&nefit_easy.bridge_url)
        .context("Failed to create Nefit Easy bridge client")?;
    let settings = pair(
        &factory,
        credentials,
        nefit_easy.registered_serials(&device),
    )
    .await?;

    let devices = BTreeMap::from([(device.as_str(), settings)]);
    let fragment = BTreeMap::from([(
        "integrations",
        BTreeMap::from([("nefit_easy", BTreeMap::from([("devices", devices)]))]),
    )]);
    let rendered = toml::to_string(&fragment).context("Failed to render settings")?;
    println!("# Add to {}", config_path.display());
    print!("{}", rendered);
    Ok(())
}
