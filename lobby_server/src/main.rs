use lobby_server::server;

#[tokio::main]
async fn main() {
    if let Err(err) = server::run_with_env().await {
        eprintln!("lobby server failed: {err}");
        std::process::exit(1);
    }
}
