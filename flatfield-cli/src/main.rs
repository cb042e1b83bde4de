//! flatfield CLI - Command-line interface for flatfield.
//!
//! Corrects the z-stack tilescans of a LIF acquisition against dark and
//! flat fields, or derives flat fields from an acquisition of a uniform
//! sample.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};

use flatfield_algorithms::{
    generate_flat_fields, AssemblerOptions, CalibrationFieldLoader, ImageAssembler,
};
use flatfield_core::Channel;
use flatfield_io::{LifFile, TiffStackReader, TiffVolumeSink};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Output directory for corrected volumes, beside the acquisition.
const CORRECTED_DIR: &str = "corrected";
/// Output directory for generated flat fields, beside the acquisition.
const FLAT_FIELD_DIR: &str = "flat-fields";

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    FlatfieldIo(#[from] flatfield_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] flatfield_core::Error),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("{0} flat field(s) could not be generated")]
    FlatFieldFailures(usize),
}

/// Dark-/flat-field correction for microscopy tilescans.
#[derive(Parser, Debug)]
#[command(name = "flatfield")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker threads for plane correction (defaults to all cores)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Correct every z-stack tilescan of a LIF file
    Correct {
        /// Input LIF file
        acquisition: PathBuf,

        /// Four-plane dark-field TIFF (647, 561, 488, 405 nm)
        dark_field: PathBuf,

        /// Channel wavelength and flat-field TIFF pairs, in acquisition channel order
        #[arg(required = true, num_args = 2.., value_names = ["CHANNEL", "FLAT_FIELD"])]
        calibrations: Vec<String>,

        /// Correct planes on a single thread
        #[arg(long)]
        sequential: bool,
    },

    /// Generate per-tilescan flat fields from a LIF file
    FlatField {
        /// Input LIF file
        acquisition: PathBuf,
    },
}

/// Splits `<CHANNEL> <FLAT_FIELD>` arguments into typed pairs.
fn parse_calibration_pairs(args: &[String]) -> Result<Vec<(Channel, PathBuf)>> {
    if args.is_empty() || !args.len().is_multiple_of(2) {
        return Err(CliError::InvalidArguments(format!(
            "expected <CHANNEL> <FLAT_FIELD> pairs, got {} value(s)",
            args.len()
        )));
    }
    args.chunks_exact(2)
        .map(|pair| -> Result<(Channel, PathBuf)> {
            let channel = pair[0]
                .parse::<Channel>()
                .map_err(flatfield_core::Error::from)?;
            Ok((channel, PathBuf::from(&pair[1])))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| CliError::ThreadPool(e.to_string()))?;
    }

    match cli.command {
        Commands::Correct {
            acquisition,
            dark_field,
            calibrations,
            sequential,
        } => {
            let pairs = parse_calibration_pairs(&calibrations)?;
            let start = Instant::now();

            let loader = CalibrationFieldLoader::new(TiffStackReader);
            let config = loader.load_config(&dark_field, &pairs)?;
            log::info!(
                "Loaded dark field and {} flat field(s) of {}x{}",
                config.calibrations().len(),
                config.dark().spatial_shape().0,
                config.dark().spatial_shape().1
            );

            let images = LifFile::open(&acquisition)?.into_images();
            let mut sink = TiffVolumeSink::beside(&acquisition, CORRECTED_DIR)?;
            let options = AssemblerOptions::default().with_parallel(!sequential);
            let summary = ImageAssembler::new(&config, options).run(&images, &mut sink)?;

            println!(
                "Corrected {} tilescan(s) in {:.2}s",
                summary.tilescans_corrected,
                start.elapsed().as_secs_f64()
            );
            println!("Skipped (single slice): {}", summary.tilescans_skipped);
            println!("Volumes written: {}", summary.volumes_written);
            println!("Planes corrected: {}", summary.planes_corrected);
            println!("Output: {}", sink.dir().display());
        }

        Commands::FlatField { acquisition } => {
            let start = Instant::now();
            let images = LifFile::open(&acquisition)?.into_images();
            let mut sink = TiffVolumeSink::beside(&acquisition, FLAT_FIELD_DIR)?;
            let report = generate_flat_fields(&images, &mut sink);

            println!(
                "Generated {} flat field(s) in {:.2}s",
                report.written.len(),
                start.elapsed().as_secs_f64()
            );
            for (name, err) in &report.failed {
                println!("Failed: {}: {}", name, err);
            }
            println!("Output: {}", sink.dir().display());

            if !report.is_complete() {
                return Err(CliError::FlatFieldFailures(report.failed.len()));
            }
        }
    }

    Ok(())
}
