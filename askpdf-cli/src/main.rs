use anyhow::Result;
use askpdf_cli::{Cli, app};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "askpdf=debug" } else { "askpdf=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    app::run(cli).await
}
