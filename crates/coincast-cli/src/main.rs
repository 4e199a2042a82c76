mod cli;
mod commands;
mod error;
mod logging;
mod metadata;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::commands::CommandOutput;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let exit_code = match commands::run(&cli).await? {
        CommandOutput::Document(document) => {
            println!("{}", serde_json::to_string_pretty(&document)?);
            0
        }
        CommandOutput::Envelope(result) => {
            let exit_code = result.exit_code();
            output::render(&result.into_envelope(), cli.pretty)?;
            exit_code
        }
        CommandOutput::Streamed { exit_code } => exit_code,
    };

    Ok(ExitCode::from(exit_code))
}
