//! AIOX platform binary. All CLI logic lives in the `cli` module.

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
