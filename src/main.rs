use anyhow::Result;
use clap::Parser;
use stackctl::cli::commands::doctor::{DoctorCommand, DoctorOptions};
use stackctl::cli::commands::lifecycle::{LifecycleAction, LifecycleCommand};
use stackctl::cli::{Cli, Commands};
use stackctl::{config, init_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = config()?.clone();
    if let Err(e) = init_telemetry(&settings.observability) {
        eprintln!("Warning: Failed to initialize logging: {e}");
    }

    let code = match cli.command {
        Commands::Diagnose {
            verbose,
            quiet,
            no_auto_start,
            quick,
            json,
            fix,
        } => {
            let options = DoctorOptions {
                verbose,
                quiet,
                no_auto_start,
                quick,
                json,
                fix,
            };
            DoctorCommand::new(options, settings).execute().await?
        }
        Commands::Up => LifecycleCommand::new(LifecycleAction::Up, settings).execute().await?,
        Commands::Down => LifecycleCommand::new(LifecycleAction::Down, settings).execute().await?,
        Commands::Status => LifecycleCommand::new(LifecycleAction::Status, settings).execute().await?,
    };

    std::process::exit(code);
}
