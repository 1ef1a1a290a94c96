mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, CrdAction, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Check(args) => commands::check::run(args).await?,
        Commands::Version => commands::version::run()?,
    }

    Ok(())
}
