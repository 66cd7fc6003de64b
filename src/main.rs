//! CLI entry point for lab-bench
//!
//! Runs one bench procedure per invocation:
//! - `demodulator`: SSB demodulator sideband rejection
//! - `modulator`: I/Q modulator amplitude and phase balance
//! - `amplifier`: RF power amplifier efficiency, harmonics and frequency response
//! - `cat`: radio CAT interface validation over serial
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! lab-bench demodulator --output-dir results/
//! lab-bench --alternate-site amplifier --drive wavegen --drive-amplitude 0.8
//! lab-bench cat --port /dev/ttyUSB0
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lab_bench::cat::{CatPort, CatValidator};
use lab_bench::config::{Settings, Site};
use lab_bench::logging;
use lab_bench::procedures::{
    run_at_site, Amplifier, Demodulator, DriveSource, Modulator, OperatorGate, Procedure,
    ProcedureOutput,
};
use lab_bench::BenchError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lab-bench")]
#[command(about = "Automated RF subsystem characterisation on a SCPI bench", long_about = None)]
struct Cli {
    /// Configuration file (default: config/bench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the alternate site's instrument addresses
    #[arg(long, global = true)]
    alternate_site: bool,

    /// Directory for row files and charts
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure SSB demodulator sideband rejection
    Demodulator,

    /// Measure I/Q modulator amplitude and phase balance
    Modulator,

    /// Characterise the RF power amplifier
    Amplifier {
        /// Drive source: wavegen (scope generator) or fxngen (push-pull)
        #[arg(long)]
        drive: Option<DriveSource>,

        /// Drive amplitude in Vpp
        #[arg(long)]
        drive_amplitude: Option<f64>,
    },

    /// Validate the radio's CAT interface
    Cat {
        /// Serial port, e.g. /dev/ttyUSB0 or COM11
        #[arg(long)]
        port: Option<String>,

        #[arg(long)]
        baud: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            if let Some(BenchError::Aborted) = e.downcast_ref::<BenchError>() {
                return ExitCode::FAILURE;
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    if cli.alternate_site {
        settings.site = Site::Alternate;
    }
    if let Some(dir) = cli.output_dir {
        settings.output.directory = dir;
    }
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }
    if let Commands::Amplifier {
        drive,
        drive_amplitude,
    } = &cli.command
    {
        if let Some(drive) = drive {
            settings.amplifier.drive = *drive;
        }
        if let Some(amplitude) = drive_amplitude {
            settings.amplifier.drive_amplitude_v = *amplitude;
        }
    }
    if let Commands::Cat { port, baud } = &cli.command {
        if let Some(port) = port {
            settings.cat.port = port.clone();
        }
        if let Some(baud) = baud {
            settings.cat.baud = *baud;
        }
    }
    settings.validate()?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Demodulator => {
            let procedure = Demodulator::new(settings.demodulator.clone());
            measure(&procedure, &settings).await
        }
        Commands::Modulator => {
            let procedure = Modulator::new(settings.modulator.clone());
            measure(&procedure, &settings).await
        }
        Commands::Amplifier { .. } => {
            let procedure = Amplifier::new(settings.amplifier.clone());
            measure(&procedure, &settings).await
        }
        Commands::Cat { .. } => validate_cat(&settings).await,
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn measure<P: Procedure>(procedure: &P, settings: &Settings) -> Result<ExitCode> {
    let dir = settings.output.directory.as_path();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;

    let mut gate = OperatorGate::stdin();
    let output = run_at_site(
        procedure,
        settings.site_addresses(),
        &settings.session,
        &mut gate,
    )
    .await?;

    save(&output, dir)?;
    Ok(ExitCode::SUCCESS)
}

fn save(output: &impl ProcedureOutput, dir: &Path) -> Result<()> {
    for path in output.save(dir)? {
        println!("Saved {}", path.display());
    }
    Ok(())
}

async fn validate_cat(settings: &Settings) -> Result<ExitCode> {
    let cat = &settings.cat;
    let mut port = match CatPort::open(&cat.port, cat.baud, cat.timeout).await {
        Ok(port) => port,
        Err(e) => {
            tracing::error!(port = %cat.port, error = %e, "CAT port open failed");
            println!("Cannot initialize serial communication.");
            println!("Is the device plugged in? Is the correct COM port chosen?");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut validator = CatValidator::new();
    let passed = validator.run(&mut port, &cat.plan()).await?;
    port.close().await?;

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
