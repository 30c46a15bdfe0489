//! Infrastructure: configuration and logging bootstrap.

pub mod config;
pub mod logging;

pub use config::{ConfigError, ConfigLoader};
