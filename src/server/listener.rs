use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::{ProxyEngine, RouteTable};

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let routes = RouteTable::load(&cfg.mapping_file, cfg.match_policy);
    let engine = Arc::new(ProxyEngine::new(routes, &cfg.upstream_settings()));

    let listen_addr = cfg.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("Listening on {}", listen_addr);

    serve(listener, engine, cfg.max_body_bytes).await
}

/// Accepts connections forever, one task per connection. Requests whose
/// declared body exceeds `max_body` bytes are answered with 413.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<ProxyEngine>,
    max_body: usize,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let engine = engine.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, engine, max_body);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
