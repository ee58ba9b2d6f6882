mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Load CSV extracts, keep their history and export the derived views"
)]
struct Cli {
    /// Execution environment (local, remote)
    #[arg(long)]
    env: String,

    /// Profile section of the config file to run
    #[arg(long)]
    profile: String,
}

/// Config file location: `$STRATA_CONFIG`, else `strata.yml`.
fn config_path() -> PathBuf {
    std::env::var_os("STRATA_CONFIG").map_or_else(|| PathBuf::from("strata.yml"), PathBuf::from)
}

fn main() -> ExitCode {
    // A missing .env file is fine; variables may come from the shell.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logging::init("info");

    match commands::run::execute(&config_path(), &cli.env, &cli.profile) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
