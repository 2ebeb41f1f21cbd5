use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    heron_chat_client::cli::run_cli().await
}
