#![allow(dead_code)]

use p2p_file_server::engine::{RequestEngine, TracingObserver};
use p2p_file_server::network::{Connection, Listener, SocketSettings};
use p2p_file_server::platform::StaticIpDiscovery;
use p2p_file_server::{
    EventObserver, FileServer, Request, RequestPayload, ServerResult, ServerSettings,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// A running node with its own transfer folder
pub struct Node {
    pub server: FileServer,
    pub dir: TempDir,
    pub accept_loop: JoinHandle<ServerResult<()>>,
}

impl Node {
    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn folder(&self) -> &Path {
        self.dir.path()
    }
}

pub fn test_settings(folder: &Path) -> ServerSettings {
    ServerSettings {
        port: 0,
        bind_address: "127.0.0.1".parse().unwrap(),
        socket_timeout_ms: 3_000,
        connect_timeout_ms: 2_000,
        local_server_folder_path: folder.to_path_buf(),
        local_network_cidr: "127.0.0.0/8".into(),
        ..ServerSettings::default()
    }
}

pub async fn start_node() -> Node {
    start_node_with(|_| {}, Arc::new(TracingObserver)).await
}

pub async fn start_node_with<F>(tweak: F, observer: Arc<dyn EventObserver>) -> Node
where
    F: FnOnce(&mut ServerSettings),
{
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(dir.path());
    tweak(&mut settings);

    let server = FileServer::bind_with(settings, Arc::new(StaticIpDiscovery::loopback()), observer)
        .await
        .unwrap();
    let accept_loop = server.start();
    Node {
        server,
        dir,
        accept_loop,
    }
}

/// Poll `condition` until it holds or the wait runs out
pub async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn write_file(folder: &Path, name: &str, size: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(folder.join(name), &data).await.unwrap();
    data
}

/// Hand-driven peer speaking the wire protocol, for steering a real node
/// into states two real nodes would not reach on their own
pub struct MockPeer {
    listener: Listener,
    engine: RequestEngine,
    addr: SocketAddr,
}

impl MockPeer {
    pub fn bind() -> Self {
        let settings = SocketSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            io_timeout: Duration::from_secs(3),
            ..SocketSettings::default()
        };
        let listener = Listener::bind(&settings).unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = RequestEngine::new(settings, addr, Arc::new(TracingObserver));
        Self {
            listener,
            engine,
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send(&self, target: SocketAddr, payload: RequestPayload) {
        self.engine.send_request(target, payload).await.unwrap();
    }

    pub async fn send_holding(&self, target: SocketAddr, payload: RequestPayload) -> Connection {
        self.engine
            .send_request_holding(target, payload)
            .await
            .unwrap()
    }

    /// Next request sent to this peer, with the connection it came on
    pub async fn receive(&self) -> (Request, Connection) {
        let mut conn = timeout(WAIT, self.listener.accept())
            .await
            .expect("no connection reached the mock peer")
            .unwrap();
        let request = self.engine.receive_request(&mut conn).await.unwrap();
        (request, conn)
    }

    pub async fn expect_silence(&self, within: Duration) {
        if let Ok(conn) = timeout(within, self.listener.accept()).await {
            panic!("unexpected connection from {}", conn.unwrap().peer_addr());
        }
    }
}
