pub mod host;
pub mod server;
pub mod wire;
