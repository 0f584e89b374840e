use anyhow::Result;
use swagdocs::download::Downloader;
use swagdocs::pipeline::prepare_docs;
use swagdocs::{PrepareConfig, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();
    let config = PrepareConfig::from_cli()?;
    let downloader = Downloader::new()?;
    prepare_docs(&config, &downloader).await?;
    Ok(())
}
