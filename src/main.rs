//! Gazolive - Main Entry Point
//!
//! Trains, tunes and exports gradient-boosted tree models from the command line.

use clap::Parser;
use gazolive_ml::cli::{cmd_device, cmd_inspect, cmd_preset, cmd_train, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gazolive_ml=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { config, output, report } => {
            cmd_train(&config, output.as_deref(), report.as_deref())?;
        }
        Commands::Preset { preset, data, target, output, trials, report, save_config } => {
            cmd_preset(
                preset,
                &data,
                target.as_deref(),
                output.as_deref(),
                trials,
                report.as_deref(),
                save_config.as_deref(),
            )?;
        }
        Commands::Inspect { model } => {
            cmd_inspect(&model)?;
        }
        Commands::Device => {
            cmd_device()?;
        }
    }

    Ok(())
}
