//! Core utilities shared across the tessera crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - TOML configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    Config, DEFAULT_CONFIG_FILE, DemoConfig, GraphicsConfig, LoggingConfig, MaterialsConfig,
    WindowConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging, init_logging_with};
pub use timer::FrameTimer;
