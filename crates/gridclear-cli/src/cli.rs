use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use gridclear_algo::market::GskWeights;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridclear", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level or filter directive; `RUST_LOG` takes precedence
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check grid topology and, optionally, a clearing configuration
    Validate {
        /// Market data: a snapshot directory or a JSON file
        #[arg(long, value_hint = ValueHint::AnyPath)]
        data: PathBuf,
        /// Clearing configuration (TOML) to check against the data
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the node PTDF, or the zonal PTDF, as CSV
    Ptdf {
        #[arg(long, value_hint = ValueHint::AnyPath)]
        data: PathBuf,
        /// Aggregate node columns to zones with generation shift keys
        #[arg(long)]
        zonal: bool,
        /// Shift key weights for --zonal
        #[arg(long, value_enum, default_value_t = GskArg::Capacity)]
        gsk: GskArg,
        /// Write to a file instead of stdout
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        out: Option<PathBuf>,
    },
    /// Run the full clearing into a result directory
    Run {
        #[arg(long, value_hint = ValueHint::AnyPath)]
        data: PathBuf,
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: PathBuf,
        #[arg(long, value_hint = ValueHint::DirPath)]
        out: PathBuf,
        /// Worker threads (0 = one per CPU); overrides the configuration
        #[arg(long)]
        threads: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GskArg {
    Capacity,
    Flat,
}

impl From<GskArg> for GskWeights {
    fn from(arg: GskArg) -> Self {
        match arg {
            GskArg::Capacity => GskWeights::Capacity,
            GskArg::Flat => GskWeights::Flat,
        }
    }
}
