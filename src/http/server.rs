//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::routes::router;
use super::AppState;
use crate::error::{Result, RosterError};

/// HTTP server for the guild roster API.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// State shared with the handlers
    state: AppState,
}

impl HttpServer {
    /// Bind the server to `addr`. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves, after
    /// in-flight requests complete.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Starting HTTP server with graceful shutdown");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                RosterError::Io(e)
            })
    }
}
