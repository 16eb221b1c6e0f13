//! Streaming scheduler configuration with sensible defaults and RON persistence.

mod config;
mod error;

pub use config::{
    BudgetConfig, CameraGateConfig, DebugConfig, DistanceConfig, FrustumConfig, QueueConfig,
    StreamConfig, WorkerConfig,
};
pub use error::ConfigError;
