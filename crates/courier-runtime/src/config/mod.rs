//! Configuration module for the Courier runtime.
//!
//! Layered loading of logging, update loop and bot profile settings from
//! files, environment variables and code, plus validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ConfigProfile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, DispatchConfig, LogFormat, LogOutput, LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
