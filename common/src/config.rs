// Environment configuration shared by the services.
//
// Call sites read values on demand; defaults keep a single-machine setup
// working without any `.env` file.

use std::env;
use std::path::PathBuf;

pub fn db_ip() -> String {
    env::var("DB_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn db_port() -> u16 {
    env::var("DB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20010)
}

pub fn db_path() -> String {
    env::var("DB_PATH").unwrap_or_else(|_| "data/platform.db".to_string())
}

pub fn lobby_ip() -> String {
    env::var("LOBBY_IP").unwrap_or_else(|_| "0.0.0.0".to_string())
}

pub fn lobby_port() -> u16 {
    env::var("LOBBY_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20012)
}

// Address game clients are told to connect to; game servers bind on the
// lobby host, so this is the lobby machine's externally visible IP.
pub fn server_ip() -> String {
    env::var("SERVER_IP").unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn developer_server_port() -> u16 {
    env::var("DEVELOPER_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20014)
}

pub fn temp_dir() -> PathBuf {
    env::var("TEMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("server_temp"))
}

pub fn storage_dir() -> PathBuf {
    env::var("GAME_STORAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("uploaded_games"))
}

pub fn frame_token() -> String {
    env::var("TOKEN").unwrap_or_default()
}
