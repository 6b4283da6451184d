//! Server assembly: acceptor, optional secure decorator, connection
//! manager, and the shutdown cascade.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use clipcast_core::{ClipService, Config, MediaCatalog, SqlCatalog};
use clipcast_proto::frame::FramerConfig;
use clipcast_server::{
    Accept, Acceptor, ConnectionManager, Handshake, HandlerContext, PlainAcceptor, SecureAcceptor,
    TlsHandshaker, TlsSettings,
};

pub struct ClipcastServer {
    config: Config,
    catalog: Arc<SqlCatalog>,
    clips: ClipService,
}

impl ClipcastServer {
    pub fn new(config: Config, catalog: Arc<SqlCatalog>, clips: ClipService) -> Self {
        Self {
            config,
            catalog,
            clips,
        }
    }

    pub async fn run(self) -> Result<()> {
        let server_config = &self.config.server;
        let ctx = Arc::new(HandlerContext {
            catalog: self.catalog.clone() as Arc<dyn MediaCatalog>,
            clips: self.clips.clone(),
            framer_config: FramerConfig {
                header_read_timeout: Duration::from_millis(server_config.request_read_timeout_ms),
                body_read_timeout: Duration::from_millis(server_config.body_read_timeout_ms),
            },
        });

        let manager = ConnectionManager::new(ctx);
        let shutdown = CancellationToken::new();
        let plain = PlainAcceptor::bind(&self.config.listen_address()).await?;
        let cap = server_config.open_connections_limit;

        let accept_task = if self.config.tls.enabled {
            let handshaker: Arc<dyn Handshake> = Arc::new(TlsHandshaker::from_pem_files(
                &self.config.tls.cert_path,
                &self.config.tls.key_path,
            )?);
            let settings = TlsSettings::from_config(&self.config.tls);
            info!(
                required = settings.secure_required,
                slots = settings.handshake_slots,
                "secure upgrades enabled"
            );
            let secure = SecureAcceptor::new(plain, settings, handshaker);
            spawn_accept_loop(secure, manager.clone(), cap, shutdown.clone())
        } else {
            spawn_accept_loop(plain, manager.clone(), cap, shutdown.clone())
        };

        shutdown_signal().await;
        info!("Shutdown signal received");

        // Cascade: stop admitting, close the listener, then drain the
        // connection manager under the configured bound.
        shutdown.cancel();
        accept_task.await?;
        manager
            .close(Duration::from_millis(server_config.shutdown_timeout_ms))
            .await;
        info!("Shutdown complete");
        Ok(())
    }
}

fn spawn_accept_loop<A: Accept + 'static>(
    source: A,
    manager: ConnectionManager,
    cap: usize,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut acceptor = Acceptor::new(source, manager, cap, shutdown);
    tokio::spawn(async move {
        acceptor.run().await;
        acceptor.close().await;
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
