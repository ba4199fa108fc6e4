// ── Server lifecycle ──

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::ServerError;
use crate::routes::router;
use crate::state::AppState;

/// Handle to the running backend.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// The bound address (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, drain in-flight requests, then stop the
    /// lifecycle controller.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| ServerError::Join(e.to_string()))?
    }
}

/// Bind `addr` and serve the API in a background task.
pub async fn spawn_server(state: AppState, addr: SocketAddr) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    let addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })?;

    let controller = state.controller().clone();
    let stopping = state.stopping().clone();
    let app = router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                stopping.cancel();
            })
            .await;
        controller.shutdown().await;
        if let Err(err) = served {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(ServerError::Serve(err));
        }
        info!(address = %addr, "api server stopped");
        Ok(())
    });

    Ok(ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
