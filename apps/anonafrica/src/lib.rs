pub mod config;
pub mod error;
pub mod media;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod terminal;
pub mod transport;
