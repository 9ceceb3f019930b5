use clap::Parser;
use std::process::ExitCode;

mod cache;
mod cli;
mod datapoint;
mod docker;
mod errors;
mod harness;
mod limits;
mod paths;
mod predictions;
mod run_id;
mod util;
mod validation;
mod verdict;
mod workflow;

fn main() -> ExitCode {
    init_tracing();
    let args = cli::RootArgs::parse();
    let result = match args.command {
        cli::Command::Run(args) => workflow::run_run(args),
        cli::Command::Report(args) => workflow::run_report(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("patchval=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
