pub mod config;
pub mod dataset;
pub mod estimator;
pub mod forest;
pub mod http_client;
pub mod metrics;
pub mod normalizer;
pub mod players_db;
pub mod schema;
pub mod server;
