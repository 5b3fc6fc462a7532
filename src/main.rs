use shopra_logging::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
