//! Secure upgrade decorator around the plain acceptor.
//!
//! Policy negotiation is first-byte sniffing: a peer that opens with a TLS
//! record gets the cryptographic handshake; a peer that opens with anything
//! else has declined, which falls back to cleartext unless secure
//! connections are required. The handshake itself sits behind [`Handshake`]
//! so the expensive part is pluggable and testable.
//!
//! With `handshake_slots > 0` a background flow accepts raw sockets and
//! runs handshakes off the accept path, parking finished sockets in a
//! fixed tray of ready slots that [`SecureAcceptor::accept`] drains. The
//! handshaking budget counts in-flight upgrades plus un-taken ready
//! sockets, so the tray can never overflow. With zero slots every accept
//! performs its handshake inline.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Notify, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::acceptor::{Accept, PlainAcceptor};
use crate::stream::ClientStream;

/// First byte of every TLS record carrying a ClientHello.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer opened with something other than a TLS record.
    #[error("peer did not open a secure handshake")]
    Refused,

    #[error("handshake failed: {0}")]
    Failed(io::Error),

    #[error("handshake deadline elapsed")]
    DeadlineElapsed,
}

/// The cryptographic upgrade, pinned as an external collaborator.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn upgrade(&self, stream: TcpStream) -> Result<ClientStream, HandshakeError>;
}

/// Production upgrade via rustls.
pub struct TlsHandshaker {
    acceptor: TlsAcceptor,
}

impl TlsHandshaker {
    /// Load certificate chain and private key from PEM files.
    pub fn from_pem_files(cert_path: &str, key_path: &str) -> anyhow::Result<Self> {
        let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(cert_path)?))
            .collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(anyhow::anyhow!("no certificates found in {cert_path}"));
        }
        let key =
            rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key_path)?))?
                .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Handshake for TlsHandshaker {
    async fn upgrade(&self, stream: TcpStream) -> Result<ClientStream, HandshakeError> {
        let tls = self
            .acceptor
            .accept(stream)
            .await
            .map_err(HandshakeError::Failed)?;
        Ok(ClientStream::Tls(Box::new(tls)))
    }
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Close connections whose upgrade fails instead of falling back.
    pub secure_required: bool,
    /// Per-step handshake deadline; zero waits indefinitely.
    pub handshake_timeout: Duration,
    /// Ready-socket slots; zero performs handshakes inline in accept.
    pub handshake_slots: usize,
    /// Bound on concurrently running handshake tasks.
    pub max_concurrent_handshakes: usize,
}

impl TlsSettings {
    #[must_use]
    pub fn from_config(config: &clipcast_core::config::TlsConfig) -> Self {
        Self {
            secure_required: config.secure_connection_required,
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            handshake_slots: config.handshake_slots,
            max_concurrent_handshakes: config.handshake_executor_threads.max(1),
        }
    }
}

/// Whether the peer's first byte opens a TLS record. `false` on immediate
/// EOF: a closed socket has declined.
async fn peer_opens_tls(stream: &TcpStream) -> io::Result<bool> {
    let mut first = [0u8; 1];
    let n = stream.peek(&mut first).await?;
    Ok(n == 1 && first[0] == TLS_HANDSHAKE_RECORD)
}

/// Run the negotiated policy for one raw socket.
async fn negotiate(
    stream: TcpStream,
    settings: &TlsSettings,
    handshaker: &Arc<dyn Handshake>,
) -> Result<ClientStream, HandshakeError> {
    let deadline = settings.handshake_timeout;

    let wants_tls = with_deadline(deadline, peer_opens_tls(&stream))
        .await
        .ok_or(HandshakeError::DeadlineElapsed)?
        .map_err(HandshakeError::Failed)?;

    if wants_tls {
        with_deadline(deadline, handshaker.upgrade(stream))
            .await
            .ok_or(HandshakeError::DeadlineElapsed)?
    } else if settings.secure_required {
        Err(HandshakeError::Refused)
    } else {
        tracing::debug!("peer declined secure upgrade, continuing in cleartext");
        Ok(ClientStream::Plain(stream))
    }
}

async fn with_deadline<F: std::future::Future>(deadline: Duration, fut: F) -> Option<F::Output> {
    if deadline.is_zero() {
        Some(fut.await)
    } else {
        tokio::time::timeout(deadline, fut).await.ok()
    }
}

/// Fixed tray of ready sockets shared between the background flow and
/// `accept`. A slot moves Empty → Ready when a handshake lands and back to
/// Empty when `accept` takes the socket (ownership transfer subsumes the
/// taken state). `budget` is the handshaking counter: in-flight upgrades
/// plus un-taken ready sockets.
struct Tray {
    slots: Mutex<Vec<Option<ClientStream>>>,
    budget: AtomicUsize,
    /// A socket became ready.
    ready: Notify,
    /// Budget was released (socket taken or handshake failed).
    vacated: Notify,
}

impl Tray {
    fn new(slots: usize) -> Self {
        Self {
            slots: Mutex::new((0..slots).map(|_| None).collect()),
            budget: AtomicUsize::new(0),
            ready: Notify::new(),
            vacated: Notify::new(),
        }
    }

    fn place(&self, stream: ClientStream) {
        let mut slots = self.slots.lock();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(stream);
                drop(slots);
                self.ready.notify_waiters();
            }
            None => {
                // Unreachable while the budget invariant holds.
                drop(slots);
                tracing::warn!("no free ready slot, dropping handshaken socket");
                self.release();
            }
        }
    }

    fn take(&self) -> Option<ClientStream> {
        let stream = {
            let mut slots = self.slots.lock();
            slots.iter_mut().find_map(Option::take)
        }?;
        self.release();
        Some(stream)
    }

    fn release(&self) {
        self.budget.fetch_sub(1, Ordering::SeqCst);
        self.vacated.notify_waiters();
    }

    fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.take().is_some() {
                self.budget.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

enum Mode {
    Sync {
        inner: PlainAcceptor,
        settings: TlsSettings,
        handshaker: Arc<dyn Handshake>,
    },
    Background {
        tray: Arc<Tray>,
    },
}

/// Acceptor decorator that yields secured or cleartext streams per the
/// negotiated policy.
pub struct SecureAcceptor {
    mode: Mode,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl SecureAcceptor {
    #[must_use]
    pub fn new(
        inner: PlainAcceptor,
        settings: TlsSettings,
        handshaker: Arc<dyn Handshake>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let mode = if settings.handshake_slots == 0 {
            Mode::Sync {
                inner,
                settings,
                handshaker,
            }
        } else {
            let tray = Arc::new(Tray::new(settings.handshake_slots));
            tracker.spawn(background_flow(
                inner,
                tray.clone(),
                settings,
                handshaker,
                shutdown.clone(),
                tracker.clone(),
            ));
            Mode::Background { tray }
        };

        Self {
            mode,
            shutdown,
            tracker,
        }
    }
}

#[async_trait]
impl Accept for SecureAcceptor {
    async fn accept(&mut self) -> io::Result<ClientStream> {
        match &mut self.mode {
            Mode::Sync {
                inner,
                settings,
                handshaker,
            } => loop {
                let raw = inner.accept_raw().await?;
                match negotiate(raw, settings, handshaker).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) => {
                        tracing::warn!(error = %err, "secure upgrade failed, closing socket");
                    }
                }
            },
            Mode::Background { tray } => loop {
                // Register for the ready signal before scanning the tray so
                // a socket placed in between cannot be missed.
                let mut ready = std::pin::pin!(tray.ready.notified());
                ready.as_mut().enable();
                if let Some(stream) = tray.take() {
                    return Ok(stream);
                }
                if self.shutdown.is_cancelled() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "secure acceptor is closed",
                    ));
                }
                tokio::select! {
                    () = self.shutdown.cancelled() => {}
                    () = &mut ready => {}
                }
            },
        }
    }

    /// Cascade: stop the background flow, drain handshake workers, close
    /// un-taken ready sockets.
    async fn close(&mut self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Mode::Background { tray } = &self.mode {
            tray.clear();
        }
    }
}

async fn background_flow(
    mut inner: PlainAcceptor,
    tray: Arc<Tray>,
    settings: TlsSettings,
    handshaker: Arc<dyn Handshake>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let slots = settings.handshake_slots;
    let permits = Arc::new(Semaphore::new(settings.max_concurrent_handshakes));

    'outer: loop {
        // Budget gate: in-flight + un-taken ready stays within the tray.
        loop {
            let mut vacated = std::pin::pin!(tray.vacated.notified());
            vacated.as_mut().enable();
            if tray.budget.load(Ordering::SeqCst) < slots {
                break;
            }
            tokio::select! {
                () = shutdown.cancelled() => break 'outer,
                () = &mut vacated => {}
            }
        }

        let raw = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = inner.accept_raw() => match accepted {
                Ok(raw) => raw,
                Err(err) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!(error = %err, "accept failed in secure flow");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            }
        };

        tray.budget.fetch_add(1, Ordering::SeqCst);
        let tray = tray.clone();
        let settings = settings.clone();
        let handshaker = handshaker.clone();
        let permits = permits.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            let Ok(_permit) = permits.acquire().await else {
                tray.release();
                return;
            };
            tokio::select! {
                () = shutdown.cancelled() => tray.release(),
                negotiated = negotiate(raw, &settings, &handshaker) => match negotiated {
                    Ok(stream) => tray.place(stream),
                    Err(err) => {
                        tracing::warn!(error = %err, "secure upgrade failed, closing socket");
                        tray.release();
                    }
                }
            }
        });
    }
    tracing::debug!("secure accept flow stopped");
}
