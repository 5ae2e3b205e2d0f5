use clap::Parser;

mod app;
mod config;

use config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ServiceConfig::parse();
    cfg.validate()?;
    app::run(cfg).await
}
