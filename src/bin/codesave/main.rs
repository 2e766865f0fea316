//! codesave CLI - Snapshot Python codebases into portable zip archives

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("codesave=debug")
    } else {
        EnvFilter::new("codesave=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Save(args) => commands::save::execute(args),
        Commands::Unique(args) => commands::unique::execute(args),
        Commands::MakePyz(args) => commands::make_pyz::execute(args),
        Commands::Extract(args) => commands::extract::execute(args),
        Commands::Info(args) => commands::info::execute(args),
        Commands::Run(args) => commands::run::execute(args),
        Commands::Download(args) => commands::download::execute(args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
