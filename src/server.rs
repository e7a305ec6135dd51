use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    router::{Router, RouterConfig, RouterHandle},
    session,
};

/// Accept-loop shell around the router: owns the listener, spawns one
/// session task per connection, and runs until the shutdown future fires.
pub struct Server {
    listener: TcpListener,
    config: RouterConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: RouterConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` completes. In-flight sessions are
    /// dropped with the runtime when the process exits.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let (handle, router) = Router::new(config);
        tokio::spawn(router.run());
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    handle_accept_result(accepted, &handle);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, router: &RouterHandle) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, router),
        // Transient accept failures must not take the relay down.
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, router: &RouterHandle) {
    let router = router.clone();
    tokio::spawn(async move {
        if let Err(err) = session::run_connection(stream, router).await {
            warn!(peer = %peer, error = ?err, "session ended with error");
        }
    });
}
