pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod server;
pub mod wal;
