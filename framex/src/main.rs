use anyhow::Result;
use clap::Parser;

mod cli;
mod config;
mod extract;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    cli::Args::parse().run().await
}
