//! Server lifecycle traits
//!
//! [`Server`] is implemented by the HTTP API server, the driver WebSocket
//! server and [`CombinedServer`](crate::CombinedServer). [`ServerExt`] adds
//! spawning and Ctrl+C handling on top.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A long-running listener with cooperative shutdown.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Short name used in logs ("http", "websocket", ...)
    fn name(&self) -> &str;

    /// Bound address, once listening
    fn address(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    /// Bind, serve until `shutdown` is cancelled, then drain and return.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Convenience methods available on every [`Server`].
pub trait ServerExt: Server + Sized {
    /// Run the server on a new task; cancel the returned token to stop it.
    fn spawn(self) -> (tokio::task::JoinHandle<Result<()>>, CancellationToken) {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        let handle = tokio::spawn(async move { self.run(token_clone).await });
        (handle, token)
    }

    /// Run until Ctrl+C.
    fn run_with_ctrl_c(self) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            let shutdown = crate::shutdown::ShutdownController::with_ctrl_c();
            self.run(shutdown.token()).await
        }
    }

    /// Run until `shutdown` is cancelled, on the current task.
    fn run_until(self, shutdown: CancellationToken) -> impl std::future::Future<Output = Result<()>> + Send {
        async move { self.run(shutdown).await }
    }
}

impl<T: Server + Sized> ServerExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleServer;

    #[async_trait]
    impl Server for IdleServer {
        fn name(&self) -> &str {
            "idle"
        }

        fn address(&self) -> Option<SocketAddr> {
            None
        }

        fn is_running(&self) -> bool {
            false
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawned_server_stops_on_cancel() {
        let (handle, token) = IdleServer.spawn();
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_run_until_returns_after_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(IdleServer.run_until(token).await.is_ok());
    }
}
