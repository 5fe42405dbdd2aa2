//! DTSU666 emulator.
//!
//! As a slave (non-zero `slave_id`) the emulator answers holding register reads on the serial line
//! and takes measurements from JSON telemetry messages, one per line on stdin.
//! As a master (`slave_id` 0) it polls a real meter and logs what it reads.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::LinesStream, Stream, StreamExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dtsu666_emulator::admission::ReadHoldingOnly;
use dtsu666_emulator::catalog::Catalog;
use dtsu666_emulator::config::EmulatorConfig;
use dtsu666_emulator::planner::LIVE_SECTION;
use dtsu666_emulator::server::spawn_rtu_server;
use dtsu666_emulator::telemetry::{apply_payload, parse_payload, Binding};
use dtsu666_emulator::transport::RtuTransport;
use dtsu666_emulator::{Error, Meter, Result};

#[derive(Debug, Parser)]
#[command(version, about = "DTSU666 power meter emulator over Modbus RTU")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial device, overrides the configuration
    #[arg(long)]
    serial: Option<String>,
    /// Slave id to answer, 0 to poll a real meter instead
    #[arg(long)]
    slave_id: Option<u8>,
    /// Log level (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(err) = run(cli).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EmulatorConfig::load(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(serial) = cli.serial {
        config.serial.path = serial;
    }
    if let Some(slave_id) = cli.slave_id {
        config.slave_id = slave_id;
    }

    let catalog = Catalog::dtsu666();
    config.validate(&catalog)?;

    let meter = Meter::new(catalog, config.slave_id);
    if config.slave_id == 0 {
        run_master(&meter, &config).await
    } else {
        run_slave(&meter, &config).await
    }
}

async fn run_slave(meter: &Meter, config: &EmulatorConfig) -> Result<()> {
    tracing::info!("register defaults:\n{}", meter.dump(0x0000, 11));

    let service = meter.service(Arc::new(ReadHoldingOnly))?;
    let server = spawn_rtu_server(&config.serial.path, config.serial.baud_rate, service)?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let lines = LinesStream::new(stdin.lines());
    feed_telemetry(meter, &config.bindings, lines, server).await
}

/// Apply telemetry lines to the image for as long as the server runs.
///
/// Returns an error as soon as the server task ends. A closed feed only stops the updates.
async fn feed_telemetry<S>(
    meter: &Meter,
    bindings: &[Binding],
    mut lines: S,
    mut server: JoinHandle<()>,
) -> Result<()>
where
    S: Stream<Item = std::io::Result<String>> + Unpin,
{
    let mut feed_open = true;
    loop {
        tokio::select! {
            joined = &mut server => {
                if let Err(err) = joined {
                    tracing::error!("RTU server task failed: {err}");
                }
                return Err(Error::ServerStopped);
            }
            line = lines.next(), if feed_open => match line {
                Some(line) => apply_line(meter, bindings, &line?),
                None => {
                    tracing::info!("telemetry feed closed, serving last known values");
                    feed_open = false;
                }
            },
        }
    }
}

fn apply_line(meter: &Meter, bindings: &[Binding], line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match parse_payload(line.as_bytes()) {
        Ok(payload) => {
            let applied = apply_payload(meter, &payload, bindings);
            tracing::debug!("{applied} registers updated from telemetry");
        }
        Err(err) => tracing::warn!("{err}"),
    }
}

async fn run_master(meter: &Meter, config: &EmulatorConfig) -> Result<()> {
    let mut transport = RtuTransport::open(
        &config.serial.path,
        config.serial.baud_rate,
        config.serial.response_timeout(),
    )?;

    let mut interval = tokio::time::interval(config.poll_interval());
    loop {
        interval.tick().await;
        let read = meter
            .read_meter_data(
                &mut transport,
                config.remote_id,
                config.include_config_section,
            )
            .await;
        tracing::info!("{read} registers read from meter {}", config.remote_id);
        tracing::debug!(
            "live section:\n{}",
            meter.dump(LIVE_SECTION.start, meter.catalog().len())
        );
    }
}
