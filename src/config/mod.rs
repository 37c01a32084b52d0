#[cfg(feature = "cli")]
pub mod cli;
pub mod operation;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use operation::{OperationConfig, RemoteSettings};
pub use toml_config::TomlConfig;
