use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001u16);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Stub tool server running at http://{}/sse", listener.local_addr()?);
    let ct = stub_tool_server::serve(listener)?;

    tokio::signal::ctrl_c().await?;
    ct.cancel();
    Ok(())
}
