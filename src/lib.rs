pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::HttpRemoteClient;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{OperationConfig, RemoteSettings, TomlConfig};
pub use core::{encoding::TextEncoding, engine::LoaderEngine};
pub use domain::model::{OperationKind, RunSummary, TableRow};
pub use utils::error::{LoaderError, Result};
