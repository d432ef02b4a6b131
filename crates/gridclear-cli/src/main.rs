use clap::Parser;
use gridclear_cli::cli::{Cli, Commands};
use gridclear_cli::commands::{ptdf, run, validate};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = gridclear_batch::init_tracing(&cli.log_level) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Commands::Validate { data, config, json } => {
            validate::handle(data, config.as_deref(), *json)
        }
        Commands::Ptdf {
            data,
            zonal,
            gsk,
            out,
        } => ptdf::handle(data, *zonal, (*gsk).into(), out.as_deref()),
        Commands::Run {
            data,
            config,
            out,
            threads,
        } => run::handle(data, config, out, *threads),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
