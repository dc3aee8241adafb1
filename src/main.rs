use anyhow::Context;
use blogs_subgraph::{init_logging, server, Config, Subgraph};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    init_logging(&config.log_filter, config.log_format)?;

    let subgraph = Subgraph::from_config(&config).context("Failed to assemble subgraph")?;
    tracing::info!(
        schema = %config.schema.display(),
        data = %config.data.display(),
        "Subgraph assembled"
    );

    server::serve(&config, subgraph).await.context("Server error")?;
    Ok(())
}
