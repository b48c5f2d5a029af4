//! terrastream CLI - headless driver for the tile LOD engine.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::common::ModeArg;
use commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "terrastream")]
#[command(version = terrastream::VERSION)]
#[command(about = "Progressive LOD streaming for terrain tiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame loop over a synthetic quadtree until it converges
    Simulate {
        /// Deepest LOD to build (the quadtree holds every tile from LOD 0 down)
        #[arg(long, default_value = "3")]
        depth: u8,

        /// Number of imagery layers
        #[arg(long, default_value = "2")]
        layers: u32,

        /// Maximum number of frames to run
        #[arg(long, default_value = "200")]
        frames: u32,

        /// Imagery loading mode (overrides the config file)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// INI config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fraction of content requests that fail (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,

        /// Run requests on the frame thread between frames instead of worker pools
        #[arg(long)]
        deterministic: bool,

        /// Milliseconds between frames when using worker pools
        #[arg(long, default_value = "16")]
        frame_ms: u64,

        /// Keep running after every tile reaches full resolution
        #[arg(long)]
        no_stop: bool,

        /// Directory for the log file
        #[arg(long, default_value = terrastream::logging::DEFAULT_LOG_DIR)]
        log_dir: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// INI config file (defaults only if omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            depth,
            layers,
            frames,
            mode,
            config,
            failure_rate,
            deterministic,
            frame_ms,
            no_stop,
            log_dir,
        } => commands::simulate::run(SimulateArgs {
            depth,
            layers,
            frames,
            mode,
            config,
            failure_rate,
            deterministic,
            frame_ms,
            stop_when_converged: !no_stop,
            log_dir,
        }),
        Commands::Config { config } => commands::config::run(config),
    };

    if let Err(e) = result {
        e.exit();
    }
}
