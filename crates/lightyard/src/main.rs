//! lightyard - scheduler for remotely-signed lightning nodes

use clap::Parser;
use color_eyre::eyre::Result;
use lightyard::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(cmd) => cmd.run().await,
        Command::Ca(cmd) => cmd.run().await,
    }
}
