use std::{error::Error, process::ExitCode};

use ensemble_predict::{PredictArgs, cli::ArgsError, pipeline};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match PredictArgs::load() {
        Ok(args) => args,
        // Usage errors, `--help` and `--version` print and exit through clap.
        Err(ArgsError::Cli(err)) => err.exit(),
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "prediction run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: PredictArgs) -> Result<(), Box<dyn Error>> {
    let config = args.into_config()?;
    pipeline::run(&config)?;
    Ok(())
}
