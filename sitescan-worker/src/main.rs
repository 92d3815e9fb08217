use clap::Parser;
use sitescan_worker::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sitescan_worker::init_tracing();
    sitescan_worker::run(Cli::parse()).await
}
