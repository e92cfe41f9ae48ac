use clap::Parser;
use fmriprep::{Cli, CliError, RunContext};
use rootcause::Report;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let context = RunContext::from_cli(&cli);
    match fmriprep::run(&cli, &context).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::error!(failures, run_uuid = %context.run_uuid, "some participants failed");
            ExitCode::from(u8::try_from(failures).unwrap_or(u8::MAX))
        }
        Err(err) => {
            let code = err.exit_code();
            let report: Report<CliError> = err.into();
            tracing::error!(
                run_uuid = %context.run_uuid,
                participants = ?context.participant_label,
                output_dir = %context.output_dir.display(),
                "fmriprep failed:\n{report}"
            );
            ExitCode::from(code)
        }
    }
}
