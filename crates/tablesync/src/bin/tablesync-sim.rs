#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tablesync::sim::run().await
}
