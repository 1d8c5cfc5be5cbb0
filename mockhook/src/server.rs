use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::oneshot,
    task::{JoinHandle, JoinSet},
};

use crate::config::{Configuration, ConfigurationError};
use crate::connection::handle_connection;
use crate::dump::Sink;

/// How long `stop` waits for in-flight requests before dropping them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    Address(#[from] ConfigurationError),
    #[error("Could not bind the webhook server: {0}")]
    Bind(#[from] io::Error),
}

/// A mock webhook receiver. Every POST is printed to the sink and answered
/// with `200 OK`; anything else gets `501 Not Implemented`.
pub struct WebhookServer {
    configuration: Configuration,
    sink: Sink,
}

impl WebhookServer {
    pub fn new(configuration: Configuration, sink: Sink) -> Self {
        Self {
            configuration,
            sink,
        }
    }

    /// Bind the listener and start accepting connections on the current
    /// Tokio runtime. Each connection is served on its own task.
    pub fn start(self) -> Result<RunningServer, ServerError> {
        let address = self.configuration.socket_address()?;

        let listener = std::net::TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        info!("Webhook server listening on {local_addr}");

        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        Ok(RunningServer {
            local_addr,
            shutdown,
            handle: tokio::spawn(accept_loop(listener, self.sink, shutdown_signal)),
        })
    }
}

async fn accept_loop(listener: TcpListener, sink: Sink, mut shutdown: oneshot::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // A dropped sender is treated the same as an explicit stop
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let sink = sink.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, sink).await {
                            warn!("Error serving connection from {peer}. Error: {e}");
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {e}"),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("Connection task ended abnormally: {e}");
                }
            }
        }
    }

    drop(listener);

    let drain = async {
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("Connection task ended abnormally: {e}");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            "Dropping {} connections still open after shutdown",
            connections.len()
        );
        connections.abort_all();
    }
}

/// Handle to a started `WebhookServer`
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    /// The address actually bound. Differs from the configuration when the
    /// configured port was `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, let in-flight requests finish, then return
    pub async fn stop(self) {
        info!("Stopping webhook server on {}", self.local_addr);
        let _ = self.shutdown.send(());
        join(self.handle).await;
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!("Webhook server task ended abnormally: {e}");
    }
}
