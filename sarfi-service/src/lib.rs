pub mod api;
pub mod config;
pub mod engine;
pub mod export;
pub mod import;
pub mod metrics_server;
pub mod observability;
pub mod store;

pub use engine::{EngineError, SarfiEngine};
