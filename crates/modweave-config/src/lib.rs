//! Configuration for modweave hosts: the `config.toml` layout and the
//! platform directories it lives in.

pub mod host_config;
pub mod paths;
pub mod scripting_config;

pub use host_config::{ConfigLoadError, HostConfig};
pub use paths::{ProjectPaths, APP_NAME, HOME_OVERRIDE};
pub use scripting_config::ScriptingConfig;
