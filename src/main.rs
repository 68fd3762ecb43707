//! CLI entry point for tdt2nwb
//!
//! Provides command-line interface for:
//! - Converting a TDT block plus electrode sheet into an NWB file
//! - Appending Tobii eye tracking to an existing NWB file
//!
//! # Usage
//!
//! Convert a block:
//! ```bash
//! tdt2nwb convert /data/tanks/EC02/Block-3 EC02_electrodes.csv EC02 --output-dir /data/nwb
//! ```
//!
//! Add eye tracking:
//! ```bash
//! tdt2nwb add-eye-tracking /data/nwb/EC02_Block-3.nwb EC02_tobii.h5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tdt2nwb::config::ConverterConfig;
use tdt2nwb::eyetracker::Hdf5EyeCapture;
use tdt2nwb::logging::{self, OutputFormat, TracingConfig};
use tdt2nwb::nwb::Hdf5NwbWriter;
use tdt2nwb::tdt::TankReader;
use tdt2nwb::Converter;
use tracing::info;

#[derive(Parser)]
#[command(name = "tdt2nwb")]
#[command(about = "Convert TDT recordings and eye-tracker captures to NWB", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./tdt2nwb.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a TDT block and its electrode sheet into an NWB file
    Convert {
        /// TDT block directory (holds the .tsq/.tev pair)
        block_path: PathBuf,

        /// Electrode metadata sheet (.xlsx/.xls/.ods workbook, .csv or .tsv)
        metadata_path: PathBuf,

        /// Subject identifier, used as the NWB identifier and file name prefix
        subject_id: String,

        /// Directory the NWB file is written to
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Append left and right eye tracking to an existing NWB file
    AddEyeTracking {
        /// NWB file to modify
        nwb_path: PathBuf,

        /// Tobii eye-tracker capture (HDF5)
        capture_path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConverterConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConverterConfig::load().context("Failed to load configuration")?,
    };

    let tracing_config = TracingConfig::from_converter_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format)
        .with_ansi(cli.log_format == OutputFormat::Pretty);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Convert {
            block_path,
            metadata_path,
            subject_id,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                config.output.output_dir = dir;
            }
            let mut converter = converter(config);
            let path = converter.convert_block(&block_path, &metadata_path, &subject_id)?;
            info!(path = %path.display(), "Wrote NWB file");
            println!("{}", path.display());
        }
        Commands::AddEyeTracking {
            nwb_path,
            capture_path,
        } => {
            let mut converter = converter(config);
            let added = converter.add_eye_tracking(&nwb_path, &capture_path)?;
            info!(nwb = %nwb_path.display(), series = ?added, "Eye tracking added");
        }
    }

    Ok(())
}

fn converter(config: ConverterConfig) -> Converter<TankReader, Hdf5NwbWriter, Hdf5EyeCapture> {
    let eye_source = Hdf5EyeCapture::new(config.eye_tracking.layout.clone());
    let reader = TankReader::with_stores(
        config
            .streams
            .eeg_stores
            .iter()
            .chain(config.streams.auxiliary.iter().map(|aux| &aux.store))
            .cloned(),
    );
    Converter::new(config, reader, Hdf5NwbWriter::new(), eye_source)
}
