use clap::Parser;
use switchboard::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => switchboard::cli::serve::run_serve(args).await,
        Commands::Worker(args) => switchboard::cli::worker::run_worker(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
