pub mod config;
pub mod logsink;
pub mod model;
pub mod pricing;
pub mod server;
pub mod store;
pub mod sweep;
pub mod telemetry;
