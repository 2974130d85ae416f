// Boots a db server and a lobby server on ephemeral ports for end-to-end
// tests, plus a minimal framed client.

use common::codec;
use db_server::store::SqlStore;
use lobby_server::server::{self, LobbyConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestCluster {
    pub lobby_addr: SocketAddr,
    pub db_addr: SocketAddr,
    pub storage_dir: PathBuf,
    _scratch: tempfile::TempDir,
}

pub async fn start_cluster() -> TestCluster {
    let store = SqlStore::open_in_memory().await.expect("open store");
    store.init_schema().await.expect("init schema");

    let db_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind db");
    let db_addr = db_listener.local_addr().expect("db addr");
    tokio::spawn(db_server::server::run(
        db_listener,
        store,
        Arc::new(Notify::new()),
    ));

    let scratch = tempfile::tempdir().expect("tempdir");
    let storage_dir = scratch.path().join("uploaded_games");
    let config = LobbyConfig {
        db_ip: "127.0.0.1".to_string(),
        db_port: db_addr.port(),
        server_ip: "127.0.0.1".to_string(),
        storage_dir: storage_dir.clone(),
        temp_dir: scratch.path().join("tmp"),
    };
    std::fs::create_dir_all(&storage_dir).expect("mkdir storage");
    std::fs::create_dir_all(scratch.path().join("tmp")).expect("mkdir tmp");

    let lobby_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind lobby");
    let lobby_addr = lobby_listener.local_addr().expect("lobby addr");
    tokio::spawn(server::run(
        lobby_listener,
        config,
        Arc::new(Notify::new()),
    ));

    TestCluster {
        lobby_addr,
        db_addr,
        storage_dir,
        _scratch: scratch,
    }
}

/// Direct line to the db server, for seeding and asserting persistent state.
pub async fn db_client(cluster: &TestCluster) -> common::db::DatabaseClient {
    common::db::DatabaseClient::connect("127.0.0.1", cluster.db_addr.port())
        .await
        .expect("db connect")
}

pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream }
    }

    pub async fn send(&mut self, frame: Value) {
        codec::send_json(&mut self.stream, frame).await.expect("send");
    }

    /// Next frame on the wire, reply or notification.
    pub async fn recv(&mut self) -> Value {
        codec::recv_json(&mut self.stream, Some(RECV_TIMEOUT))
            .await
            .expect("recv")
            .expect("frame before timeout")
    }

    pub async fn request(&mut self, frame: Value) -> Value {
        self.send(frame).await;
        self.recv().await
    }

    /// Register a player and return the assigned user id.
    pub async fn register(&mut self, name: &str) -> i64 {
        let reply = self
            .request(serde_json::json!({
                "op": "register",
                "name": name,
                "passwordHash": format!("hash-{name}"),
            }))
            .await;
        assert_eq!(reply["status"], "ok", "register failed: {reply}");
        reply["id"].as_i64().expect("register id")
    }
}
