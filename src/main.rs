use std::process::ExitCode;

use clap::Parser;

use tlbc::cli::Cli;
use tlbc::compile::compile;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    ExitCode::from(compile(&cli) as u8)
}
