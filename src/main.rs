mod wsrelay;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = wsrelay::app::Cli::parse();
    wsrelay::run(cli).await
}
