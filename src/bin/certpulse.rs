use anyhow::Result;
use certpulse::cli::start;

#[tokio::main]
async fn main() -> Result<()> {
    start::start().await
}
