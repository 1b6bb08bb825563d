//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

pub use config::{ClipEncoder, Config, ZoneUnits};
pub use metrics::Metrics;
