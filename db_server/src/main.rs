use db_server::server;

#[tokio::main]
async fn main() {
    if let Err(err) = server::run_with_env().await {
        eprintln!("db server failed: {err}");
        std::process::exit(1);
    }
}
