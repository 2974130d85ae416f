// Boots a db server and a developer server on ephemeral ports, plus a
// framed client that can upload packages.

use common::codec;
use db_server::store::SqlStore;
use developer_server::server::{self, DeveloperConfig};
use serde_json::Value;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestCluster {
    pub developer_addr: SocketAddr,
    pub db_addr: SocketAddr,
    pub storage_dir: PathBuf,
    pub scratch_dir: PathBuf,
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
    let config = DeveloperConfig {
        db_ip: "127.0.0.1".to_string(),
        db_port: db_addr.port(),
        storage_dir: storage_dir.clone(),
        temp_dir: scratch.path().join("tmp"),
    };
    std::fs::create_dir_all(&storage_dir).expect("mkdir storage");
    std::fs::create_dir_all(scratch.path().join("tmp")).expect("mkdir tmp");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind developer");
    let developer_addr = listener.local_addr().expect("developer addr");
    tokio::spawn(server::run(listener, config, Arc::new(Notify::new())));

    TestCluster {
        developer_addr,
        db_addr,
        storage_dir,
        scratch_dir: scratch.path().to_path_buf(),
        _scratch: scratch,
    }
}

pub async fn db_client(cluster: &TestCluster) -> common::db::DatabaseClient {
    common::db::DatabaseClient::connect("127.0.0.1", cluster.db_addr.port())
        .await
        .expect("db connect")
}

/// Builds a valid game package zip with the given name and version.
pub fn write_package(dir: &Path, file_name: &str, game: &str, version: &str) -> PathBuf {
    let zip_path = dir.join(file_name);
    let file = std::fs::File::create(&zip_path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::SimpleFileOptions::default();

    let config = serde_json::json!({
        "name": game,
        "version": version,
        "description": "test package",
        "command": "sh server/server_main.py",
    });
    zip.start_file("config.json", opts).expect("entry");
    zip.write_all(config.to_string().as_bytes()).expect("write");
    zip.start_file("client/client_main.py", opts).expect("entry");
    zip.write_all(b"print('client')\n").expect("write");
    zip.start_file("server/server_main.py", opts).expect("entry");
    zip.write_all(b"print('server')\n").expect("write");
    zip.finish().expect("finish zip");

    zip_path
}

pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream }
    }

    pub async fn recv(&mut self) -> Value {
        codec::recv_json(&mut self.stream, Some(RECV_TIMEOUT))
            .await
            .expect("recv")
            .expect("frame before timeout")
    }

    pub async fn request(&mut self, frame: Value) -> Value {
        codec::send_json(&mut self.stream, frame).await.expect("send");
        self.recv().await
    }

    /// File-carrying request: header + zip body, then the reply.
    pub async fn upload(&mut self, op: &str, zip_path: &Path) -> Value {
        codec::send_file(&mut self.stream, zip_path, serde_json::json!({"op": op}))
            .await
            .expect("send file");
        self.recv().await
    }

    pub async fn login_as(&mut self, name: &str) -> i64 {
        let reply = self
            .request(serde_json::json!({
                "op": "register",
                "username": name,
                "passwordHash": format!("hash-{name}"),
            }))
            .await;
        assert_eq!(reply["status"], "ok", "register failed: {reply}");
        let id = reply["id"].as_i64().expect("register id");

        let reply = self
            .request(serde_json::json!({
                "op": "login",
                "username": name,
                "passwordHash": format!("hash-{name}"),
            }))
            .await;
        assert_eq!(reply["status"], "ok", "login failed: {reply}");
        id
    }
}
