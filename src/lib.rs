pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod jwt;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod toast;
pub mod transport;

pub use client::AuthClient;
pub use config::Config;
pub use error::ClientError;
