#[tokio::main]
async fn main() -> anyhow::Result<()> {
    restream_supervisor::run().await
}
