//! CLI entry point for blink_daq
//!
//! Provides command-line interface for:
//! - Serving the HTTP ingest and WebSocket push endpoints
//! - Feeding a synthetic waveform through the pipeline
//! - Checking a configuration file
//!
//! # Usage
//!
//! Run the service:
//! ```bash
//! blink_daq --config config/default.toml serve
//! ```
//!
//! Estimate the rate of a simulated 20 blinks/min signal:
//! ```bash
//! blink_daq simulate --rate 20 --seconds 30
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use blink_daq::data::estimator::TickOutcome;
use blink_daq::gateway::Reading;
use blink_daq::waveform::{add_noise, SineWave, SpikeWave, Waveform};
use blink_daq::{logging, server, BlinkService, Settings};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "blink_daq")]
#[command(about = "Capacitance sensor ingest with live blink-rate estimation", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = blink_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve ingest and live push until Ctrl-C
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Feed a synthetic signal through the pipeline and print rate estimates
    Simulate {
        /// Signal rate in cycles per minute
        #[arg(long, default_value_t = 20.0)]
        rate: f64,

        /// Samples per second
        #[arg(long, default_value_t = 100.0)]
        sample_rate: f64,

        /// Simulated seconds of signal
        #[arg(long, default_value_t = 20)]
        seconds: u32,

        /// Uniform noise amplitude added to each sample
        #[arg(long, default_value_t = 0.0)]
        noise: f64,

        /// Waveform shape
        #[arg(long, value_enum, default_value_t = Shape::Spike)]
        shape: Shape,

        /// Write the sample log here instead of the configured path
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    Spike,
    Sine,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::CheckConfig => check_config(&settings),
        Commands::Serve { port } => {
            logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;
            serve(settings, port).await
        }
        Commands::Simulate {
            rate,
            sample_rate,
            seconds,
            noise,
            shape,
            log,
        } => {
            logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;
            let mut settings = settings;
            if let Some(path) = log {
                settings.storage.log_path = path;
            }
            let wave: Box<dyn Waveform> = match shape {
                Shape::Spike => Box::new(SpikeWave::at_rate(rate)),
                Shape::Sine => Box::new(SineWave::new(rate / 60.0)),
            };
            simulate(settings, wave.as_ref(), sample_rate, seconds, noise).await
        }
    }
}

fn check_config(settings: &Settings) -> Result<()> {
    println!("Configuration OK");
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

async fn serve(mut settings: Settings, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    let addr = settings.server.socket_addr()?;

    let mut service = BlinkService::new(settings)?;
    service.start();

    let server = server::spawn(addr, service.gateway()).await?;
    info!(addr = %server.local_addr(), "blink_daq running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("shutting down");

    server.shutdown().await?;
    service.shutdown().await?;
    Ok(())
}

async fn simulate(
    settings: Settings,
    wave: &dyn Waveform,
    sample_rate: f64,
    seconds: u32,
    noise: f64,
) -> Result<()> {
    let service = BlinkService::new(settings)?;
    let gateway = service.gateway();
    let start = service.clock().now();

    println!(
        "Simulating {:.1} cycles/min for {}s at {} Hz",
        wave.frequency() * 60.0,
        seconds,
        sample_rate
    );

    for second in 0..seconds {
        let mut samples = wave.sample(start + f64::from(second), sample_rate, 1.0);
        add_noise(&mut samples, noise);
        let readings: Vec<Reading> = samples
            .iter()
            .map(|s| Reading::at(s.timestamp, s.value))
            .collect();

        let worker = gateway.clone();
        tokio::task::spawn_blocking(move || worker.ingest_batch(&readings)).await?;

        match service.tick_now() {
            TickOutcome::Emitted(estimate) => {
                println!("t={:>4}s  rate={:.1}/min", second + 1, estimate.rounded_rate())
            }
            TickOutcome::Skipped(reason) => println!("t={:>4}s  skipped ({reason:?})", second + 1),
            TickOutcome::Busy => {}
        }
    }

    let mut service = service;
    service.shutdown().await?;
    Ok(())
}
