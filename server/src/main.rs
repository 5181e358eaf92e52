use anyhow::Result;
use clap::Parser;

mod api;
mod args;
mod dispatch;
mod elbv2;
mod proxy;
mod server;
mod service_discovery;

use args::{Cli, Commands};
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    kecs_common::init();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
    }
}
