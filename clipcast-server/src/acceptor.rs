//! Connection admission under the global cap.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::manager::ConnectionManager;
use crate::stream::ClientStream;

/// Source of accepted client streams. Implemented by the plain TCP
/// listener and by the secure decorator wrapping it.
#[async_trait]
pub trait Accept: Send {
    async fn accept(&mut self) -> io::Result<ClientStream>;

    /// Release the listener and any parked sockets.
    async fn close(&mut self) {}
}

/// Plain TCP admission: every accepted socket is cleartext.
pub struct PlainAcceptor {
    listener: TcpListener,
}

impl PlainAcceptor {
    #[must_use]
    pub const fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!("listening on tcp://{}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) async fn accept_raw(&mut self) -> io::Result<TcpStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

#[async_trait]
impl Accept for PlainAcceptor {
    async fn accept(&mut self) -> io::Result<ClientStream> {
        self.accept_raw().await.map(ClientStream::Plain)
    }
}

/// Accept loop: admits connections while the manager is under the cap and
/// hands each accepted stream to the manager.
pub struct Acceptor<A: Accept> {
    source: A,
    manager: ConnectionManager,
    cap: usize,
    shutdown: CancellationToken,
}

impl<A: Accept> Acceptor<A> {
    #[must_use]
    pub const fn new(
        source: A,
        manager: ConnectionManager,
        cap: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            manager,
            cap,
            shutdown,
        }
    }

    /// Run until shutdown is signalled or the manager closes. The
    /// closed-listener error raised by shutdown is swallowed.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.manager.wait_below(self.cap) => {}
            }
            if self.shutdown.is_cancelled() || self.manager.is_closing() {
                break;
            }

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.source.accept() => match accepted {
                    Ok(stream) => {
                        if !self.manager.add(stream) {
                            break;
                        }
                    }
                    Err(err) => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        tracing::warn!(error = %err, "accept failed");
                        // Back off so a persistent fault (fd exhaustion)
                        // cannot spin the loop.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        tracing::debug!("accept loop stopped");
    }

    /// Shut the underlying source down after the loop has stopped.
    pub async fn close(&mut self) {
        self.source.close().await;
    }
}
