//! Core application infrastructure

pub mod banner;
pub mod cli;
pub mod config;
pub mod constants;
pub mod persist;
pub mod shutdown;

pub use crate::app::CoreApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, AuthConfig, AuthMethod, Role, ServerConfig};
pub use persist::{ConfigStore, JsonConfigStore};
pub use shutdown::ShutdownService;
