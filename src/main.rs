use std::process::ExitCode;

use anyhow::Result;
use bridge::Bridge;
use config::Config;
use discovery::{Discovery, UdevScanner};
use error::{BridgeError, EXIT_FAILURE};
use gamepad::VirtualGamepad;
use mapping::MappingTable;
use physical::{ControllerProvider as _, EvdevProvider};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use translator::Translator;

mod bridge;
mod config;
mod discovery;
mod error;
mod filter;
mod gamepad;
mod mapping;
mod physical;
#[cfg(test)]
mod testing;
mod translator;

async fn wait_for_terminate() -> Result<()> {
    let mut interrupt_signal = unix::signal(SignalKind::interrupt())?;
    let mut terminate_signal = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt_signal.recv() => {},
        _ = terminate_signal.recv() => {},
    }
    tracing::warn!("Terminate signal is received");
    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.log_timestamp() {
        subscriber.with(fmt::layer()).try_init()?;
    } else {
        subscriber.with(fmt::layer().without_time()).try_init()?;
    }
    Ok(())
}

async fn run(config: Config, cancel: CancellationToken) -> Result<(), BridgeError> {
    let table = MappingTable::builtin()?;

    let discovery = Discovery::new(config.device_target(), UdevScanner);
    tracing::info!("Looking for controller {:?}", discovery.target());
    let provider = EvdevProvider::new(discovery, config.grab_policy());

    let device = provider.discover()?;
    tracing::info!(
        "Found {} at {:?}, auxiliary interfaces: {:?}",
        device.name,
        device.path,
        device.auxiliary
    );

    let translator = Translator::new(table, config.filter_settings());
    Bridge::new(
        provider,
        device,
        translator,
        config.bridge_settings(),
        cancel,
    )
    .run(|capabilities| VirtualGamepad::create(capabilities).map_err(BridgeError::VirtualDevice))
    .await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match Config::parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("Cannot set up logging: {e:#}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match wait_for_terminate().await {
            Ok(()) => signal_cancel.cancel(),
            Err(e) => tracing::error!("Cannot listen for terminate signals: {e:#}"),
        }
    });

    match run(config, cancel).await {
        Ok(()) => {
            tracing::info!("Bridge stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Bridge stopped with error: {e}");
            ExitCode::from(&e)
        }
    }
}
