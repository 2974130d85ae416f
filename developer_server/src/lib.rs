pub mod handlers;
pub mod package;
pub mod server;
