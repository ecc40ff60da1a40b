pub mod addr;
pub mod app;
pub mod dialer;
pub mod listener;
pub mod logging;
pub mod mode;
pub mod relay;
pub mod stream;

pub async fn run(cli: app::Cli) -> anyhow::Result<()> {
    app::run(cli).await
}
