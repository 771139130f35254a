mod auth;
mod cache;
mod cli;
mod config;
mod error;
mod insights;
mod logs;
mod metrics;
mod models;
mod overrides;
mod providers;
mod service;
mod settings;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting dorametrics - DORA metrics service");
    cli.execute().await?;

    Ok(())
}
