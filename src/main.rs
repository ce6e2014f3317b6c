use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{matrix, results, run, sync};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "shipcheck")]
#[command(version = VERSION)]
#[command(about = "Automated product install checking across container and VM backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the instruction feed, run the full check matrix, sync and archive
    Run(run::RunArgs),
    /// Show the assembled build matrix without deploying anything
    Matrix(matrix::MatrixArgs),
    /// Exchange result sets with the configured remote and merge
    Sync(sync::SyncArgs),
    /// Show the persisted result set
    Results(results::ResultsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command);
    output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
