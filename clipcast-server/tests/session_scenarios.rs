//! End-to-end protocol scenarios against a live loopback server with a
//! stub catalog and the in-memory clip store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use clipcast_core::error::{Error as CoreError, Result as CoreResult};
use clipcast_core::models::{AudioStream, Media, MediaBrief, MediaId, MediaProxy, VideoStream};
use clipcast_core::storage::MemoryBlobStore;
use clipcast_core::{ClipService, MediaCatalog, MediaLookup};
use clipcast_proto::body::Body;
use clipcast_proto::frame::{Framer, FramerConfig};
use clipcast_proto::message::{key, Status, Verb};
use clipcast_server::{
    Acceptor, ConnectionManager, Handshake, HandlerContext, HandshakeError, PlainAcceptor,
    SecureAcceptor, TlsSettings,
};

#[derive(Clone)]
struct StubCatalog {
    items: Arc<Vec<Media>>,
}

impl StubCatalog {
    fn new(items: Vec<Media>) -> Arc<Self> {
        Arc::new(Self {
            items: Arc::new(items),
        })
    }
}

#[async_trait]
impl MediaLookup for StubCatalog {
    async fn lookup(&self, id: &MediaId) -> CoreResult<Option<Media>> {
        Ok(self.items.iter().find(|m| &m.id == id).cloned())
    }
}

#[async_trait]
impl MediaCatalog for StubCatalog {
    async fn list_all(&self) -> CoreResult<Vec<Media>> {
        Ok((*self.items).clone())
    }

    async fn list_brief(&self) -> CoreResult<Vec<MediaProxy>> {
        let resolver: Arc<dyn MediaLookup> = Arc::new(self.clone());
        Ok(self
            .items
            .iter()
            .map(|m| {
                MediaProxy::new(
                    MediaBrief {
                        id: m.id.clone(),
                        title: m.title.clone(),
                    },
                    resolver.clone(),
                )
            })
            .collect())
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<MediaProxy>> {
        let resolver: Arc<dyn MediaLookup> = Arc::new(self.clone());
        Ok(self
            .items
            .iter()
            .filter(|m| m.title.contains(query))
            .map(|m| {
                MediaProxy::new(
                    MediaBrief {
                        id: m.id.clone(),
                        title: m.title.clone(),
                    },
                    resolver.clone(),
                )
            })
            .collect())
    }
}

/// Catalog whose backing store is down.
struct UnavailableCatalog;

fn store_down() -> CoreError {
    CoreError::Internal("backing store is unreachable".to_string())
}

#[async_trait]
impl MediaLookup for UnavailableCatalog {
    async fn lookup(&self, _id: &MediaId) -> CoreResult<Option<Media>> {
        Err(store_down())
    }
}

#[async_trait]
impl MediaCatalog for UnavailableCatalog {
    async fn list_all(&self) -> CoreResult<Vec<Media>> {
        Err(store_down())
    }

    async fn list_brief(&self) -> CoreResult<Vec<MediaProxy>> {
        Err(store_down())
    }

    async fn search(&self, _query: &str) -> CoreResult<Vec<MediaProxy>> {
        Err(store_down())
    }
}

fn media(id: &str, title: &str, duration_secs: u32, locator: &str) -> Media {
    Media {
        id: MediaId::from_hex(id).unwrap(),
        title: title.to_string(),
        duration_secs,
        video: Some(VideoStream {
            width: 1280,
            height: 720,
            codec: "h264".to_string(),
            container: "mp4".to_string(),
        }),
        audio: Some(AudioStream {
            codec: "aac".to_string(),
            container: "mp4".to_string(),
        }),
        locator: locator.to_string(),
    }
}

fn three_item_catalog() -> Arc<StubCatalog> {
    StubCatalog::new(vec![
        media("01", "alpha", 5, "clips/alpha"),
        media("02", "beta", 10, "clips/beta"),
        media("03", "gamma", 7, "clips/gamma"),
    ])
}

fn seeded_store(locator: &str, indices: std::ops::Range<u32>) -> MemoryBlobStore {
    let store = MemoryBlobStore::new();
    for i in indices {
        store.insert(locator, &format!("v{i}"), Bytes::from(format!("v{i}")));
        store.insert(locator, &format!("a{i}"), Bytes::from(format!("a{i}")));
    }
    store
}

struct TestServer {
    addr: std::net::SocketAddr,
    manager: ConnectionManager,
    shutdown: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(catalog: Arc<dyn MediaCatalog>, store: MemoryBlobStore, cap: usize) -> Self {
        let ctx = Arc::new(HandlerContext {
            catalog,
            clips: ClipService::new(Arc::new(store)),
            framer_config: FramerConfig {
                header_read_timeout: Duration::from_secs(5),
                body_read_timeout: Duration::from_secs(5),
            },
        });
        let manager = ConnectionManager::new(ctx);
        let plain = PlainAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = plain.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let mut acceptor = Acceptor::new(plain, manager.clone(), cap, shutdown.clone());
        let accept_task = tokio::spawn(async move {
            acceptor.run().await;
            acceptor.close().await;
        });
        Self {
            addr,
            manager,
            shutdown,
            accept_task,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
        self.manager.close(Duration::from_secs(5)).await;
    }

    async fn wait_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.manager.open_connections() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "open_connections stuck at {}, wanted {expected}",
            self.manager.open_connections()
        );
    }
}

struct TestClient {
    stream: TcpStream,
    framer: Framer,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            framer: Framer::new(FramerConfig::default()),
        }
    }

    async fn request(
        &mut self,
        verb: Verb,
        fields: &[(&str, &str)],
    ) -> (Status, Option<String>, Bytes) {
        self.framer
            .write_request(&mut self.stream, verb, fields)
            .await
            .unwrap();
        let message = self.framer.extract(&mut self.stream).await.unwrap();
        parse_response(&message)
    }
}

/// Split a framed response into status, object name and body bytes.
fn parse_response(message: &[u8]) -> (Status, Option<String>, Bytes) {
    let mut offset = 0;
    let mut status = None;
    let mut object = None;
    let body_len;
    loop {
        let line_end = message[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .expect("unterminated header line")
            + offset;
        let line = std::str::from_utf8(&message[offset..line_end]).unwrap();
        offset = line_end + 1;
        let (name, value) = line.split_once(' ').expect("header line without value");
        match name {
            key::RESPONSE_TYPE => status = Status::from_str(value),
            key::SERIALIZED_OBJECT => object = Some(value.to_string()),
            key::BODY_LENGTH => {
                body_len = value.parse::<usize>().unwrap();
                break;
            }
            other => panic!("unexpected header line {other:?}"),
        }
    }
    let body = Bytes::copy_from_slice(&message[offset..offset + body_len]);
    (status.expect("missing response status"), object, body)
}

fn decode_list(body: Bytes) -> (Vec<String>, Vec<String>) {
    match Body::decode(body).unwrap() {
        Body::MediaList(list) => (list.ids, list.titles),
        other => panic!("expected MediaList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_all() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(object.as_deref(), Some("MediaList"));
    let (ids, titles) = decode_list(body);
    assert_eq!(ids, vec!["01", "02", "03"]);
    assert_eq!(titles, vec!["alpha", "beta", "gamma"]);

    server.stop().await;
}

#[tokio::test]
async fn test_list_filtered() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, _, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, "^b")])
        .await;
    assert_eq!(status, Status::Ok);
    let (ids, titles) = decode_list(body);
    assert_eq!(ids, vec!["02"]);
    assert_eq!(titles, vec!["beta"]);

    server.stop().await;
}

#[tokio::test]
async fn test_list_with_bad_filter_is_rejected() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, "[unclosed")])
        .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(object, None);
    assert!(body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_info_on_empty_catalog_is_bad_request() {
    let server = TestServer::start(StubCatalog::new(vec![]), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client.request(Verb::Info, &[(key::MEDIA_ID, "ab")]).await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(object, None);
    assert!(body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_info_malformed_id_keeps_socket_open() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, _, body) = client.request(Verb::Info, &[(key::MEDIA_ID, "xx")]).await;
    assert_eq!(status, Status::BadRequest);
    assert!(body.is_empty());

    // Same socket still serves requests.
    let (status, _, _) = client.request(Verb::Info, &[(key::MEDIA_ID, "01")]).await;
    assert_eq!(status, Status::Ok);

    server.stop().await;
}

#[tokio::test]
async fn test_info_returns_metadata() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client.request(Verb::Info, &[(key::MEDIA_ID, "02")]).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(object.as_deref(), Some("MediaInfo"));
    match Body::decode(body).unwrap() {
        Body::MediaInfo(info) => {
            assert_eq!(info.id, "02");
            assert_eq!(info.title, "beta");
            assert_eq!(info.duration_secs, 10);
            assert_eq!(info.video.unwrap().codec, "h264");
            assert_eq!(info.audio.unwrap().codec, "aac");
        }
        other => panic!("expected MediaInfo, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_fetch_normal_range() {
    let store = seeded_store("clips/beta", 0..10);
    let server = TestServer::start(three_item_catalog(), store, 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client
        .request(
            Verb::Fetch,
            &[
                (key::MEDIA_ID, "02"),
                (key::STARTING_PIECE, "2"),
                (key::TOTAL_PIECES, "3"),
            ],
        )
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(object.as_deref(), Some("FetchedClips"));
    match Body::decode(body).unwrap() {
        Body::FetchedClips(clips) => {
            assert_eq!(clips.id, "02");
            assert_eq!(clips.offset, 2);
            assert_eq!(clips.video.len(), 3);
            assert_eq!(clips.audio.len(), 3);
            assert_eq!(clips.video[0].as_deref(), Some(b"v2" as &[u8]));
            assert_eq!(clips.video[2].as_deref(), Some(b"v4" as &[u8]));
            assert_eq!(clips.audio[0].as_deref(), Some(b"a2" as &[u8]));
            assert_eq!(clips.audio[2].as_deref(), Some(b"a4" as &[u8]));
        }
        other => panic!("expected FetchedClips, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_fetch_out_of_range_is_bad_request() {
    let store = seeded_store("clips/beta", 0..10);
    let server = TestServer::start(three_item_catalog(), store, 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client
        .request(
            Verb::Fetch,
            &[
                (key::MEDIA_ID, "02"),
                (key::STARTING_PIECE, "9"),
                (key::TOTAL_PIECES, "5"),
            ],
        )
        .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(object, None);
    assert!(body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_fetch_missing_field_is_bad_request() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, _, _) = client.request(Verb::Fetch, &[(key::MEDIA_ID, "02")]).await;
    assert_eq!(status, Status::BadRequest);

    server.stop().await;
}

#[tokio::test]
async fn test_store_outage_is_server_error() {
    let server = TestServer::start(Arc::new(UnavailableCatalog), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;

    let (status, object, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::ServerError);
    assert_eq!(object, None);
    assert!(body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_search_returns_lazy_proxies() {
    let catalog = three_item_catalog();

    let results = catalog.search("mm").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title(), "gamma");
    // Non-title fields resolve through the catalog on demand.
    assert_eq!(results[0].duration_secs().await.unwrap(), 7);
}

#[tokio::test]
async fn test_keep_alive_serves_requests_in_order() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;
    let mut client = TestClient::connect(server.addr).await;
    server.wait_connections(1).await;

    let (status, _, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(decode_list(body).0.len(), 3);

    let (status, _, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, "^g")])
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(decode_list(body).1, vec!["gamma"]);

    // One socket, one connection: the counter saw exactly one increment
    // and decrements only when the client goes away.
    assert_eq!(server.manager.open_connections(), 1);
    drop(client);
    server.wait_connections(0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_capacity_is_never_exceeded() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 2).await;

    let mut first = TestClient::connect(server.addr).await;
    let mut second = TestClient::connect(server.addr).await;
    let (status, _, _) = first
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    let (status, _, _) = second
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    server.wait_connections(2).await;

    // A third connection sits in the backlog until a slot frees.
    let mut third = TestClient::connect(server.addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.manager.open_connections(), 2);

    drop(first);
    let (status, _, _) = third
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    assert!(server.manager.open_connections() <= 2);

    server.stop().await;
}

#[tokio::test]
async fn test_cleartext_fallback_through_secure_acceptor() {
    /// Upgrade stub standing in for the cryptographic handshake.
    struct NoTlsHandshake;

    #[async_trait]
    impl Handshake for NoTlsHandshake {
        async fn upgrade(&self, _stream: TcpStream) -> Result<clipcast_server::ClientStream, HandshakeError> {
            Err(HandshakeError::Failed(std::io::Error::other(
                "upgrade not expected in this scenario",
            )))
        }
    }

    let ctx = Arc::new(HandlerContext {
        catalog: three_item_catalog(),
        clips: ClipService::new(Arc::new(MemoryBlobStore::new())),
        framer_config: FramerConfig::default(),
    });
    let manager = ConnectionManager::new(ctx);
    let plain = PlainAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = plain.local_addr().unwrap();
    let settings = TlsSettings {
        secure_required: false,
        handshake_timeout: Duration::from_secs(5),
        handshake_slots: 4,
        max_concurrent_handshakes: 2,
    };
    let secure = SecureAcceptor::new(plain, settings, Arc::new(NoTlsHandshake));
    let shutdown = CancellationToken::new();
    let mut acceptor = Acceptor::new(secure, manager.clone(), 8, shutdown.clone());
    let accept_task = tokio::spawn(async move {
        acceptor.run().await;
        acceptor.close().await;
    });

    // The peer never opens TLS; traffic flows in cleartext.
    let mut client = TestClient::connect(addr).await;
    let (status, _, body) = client
        .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(decode_list(body).0.len(), 3);

    shutdown.cancel();
    let _ = accept_task.await;
    manager.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_shutdown_closes_all_connections() {
    let server = TestServer::start(three_item_catalog(), MemoryBlobStore::new(), 8).await;

    let mut clients = Vec::new();
    for _ in 0..4 {
        let mut client = TestClient::connect(server.addr).await;
        let (status, _, _) = client
            .request(Verb::List, &[(key::TITLE_CONTAINS, ".*")])
            .await;
        assert_eq!(status, Status::Ok);
        clients.push(client);
    }
    server.wait_connections(4).await;

    let addr = server.addr;
    let manager = server.manager.clone();
    server.stop().await;
    assert_eq!(manager.open_connections(), 0);

    // Every parked client sees EOF.
    for client in &mut clients {
        let err = client.framer.extract(&mut client.stream).await.unwrap_err();
        assert!(matches!(
            err,
            clipcast_proto::frame::FrameError::PeerClosed
        ));
    }

    // The listener is gone; new connections are refused.
    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err());
}
