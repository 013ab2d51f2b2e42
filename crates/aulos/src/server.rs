use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aulos_net::{select_resolver, NetError, NetOptions};
use axum::Router;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::handler;
use crate::state::ProxyState;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid port: {0}")]
    BadPort(String),
    #[error("network setup failed: {0}")]
    Net(#[from] NetError),
    #[error("tls setup failed: {0}")]
    Tls(std::io::Error),
    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Router over the shared state: one handler, every path and method.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(handler::handle).with_state(state)
}

/// Build state, pick the outbound resolver, and serve until shutdown.
pub async fn serve(config: Config) -> Result<(), ServerError> {
    let resolver = select_resolver(config.dns()).await?.map(Arc::new);
    if let Some(resolver) = &resolver {
        info!(server = %resolver.server(), "outbound dns resolver selected");
    }

    let state = Arc::new(ProxyState::new(
        NetOptions::default(),
        resolver,
        config.work_pool(),
    )?);
    let app = router(state);

    let port: u16 = config
        .port()
        .parse()
        .map_err(|_| ServerError::BadPort(config.port()))?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                handle.graceful_shutdown(Some(Duration::from_secs(5)));
            }
        }
    });

    match config.ssl_paths() {
        Some((cert, key)) => {
            // RustlsConfig serves TLS 1.2 and 1.3.
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(ServerError::Tls)?;
            info!(%addr, "https service listening");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, "http service listening");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    Ok(())
}
