use anyhow::Result;
use swagdocs::server;
use swagdocs::{ServeConfig, StaticTree, logging};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let config = ServeConfig::from_cli()?;
    let tree = match &config.root {
        Some(root) => StaticTree::from_dir(root)?,
        None => StaticTree::embedded(),
    };
    server::run_server(config, tree).await
}
