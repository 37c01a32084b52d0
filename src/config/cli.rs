use crate::config::toml_config::TomlConfig;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "small-dataloader")]
#[command(about = "Batch CSV loader and extractor for a remote record store")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "dataloader.toml")]
    pub config: String,

    /// Override operation kind (insert, update, upsert, delete, extract, extract_all)
    #[arg(long)]
    pub operation: Option<String>,

    /// Override target entity
    #[arg(long)]
    pub entity: Option<String>,

    /// Override source CSV path
    #[arg(short, long)]
    pub input: Option<String>,

    /// Override directory for success/error files
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Override load batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override remote endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    pub monitor: Option<bool>,

    /// Show the resolved run without contacting the remote service
    #[arg(long)]
    pub dry_run: bool,
}

impl CliConfig {
    /// Command line values win over the file.
    pub fn apply_overrides(&self, config: &mut TomlConfig) {
        if let Some(operation) = &self.operation {
            config.operation.kind = Some(operation.clone());
            tracing::info!("🔧 Operation overridden to: {}", operation);
        }
        if let Some(entity) = &self.entity {
            config.operation.entity = Some(entity.clone());
        }
        if let Some(input) = &self.input {
            config.source.path = Some(input.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output.directory = Some(dir.clone());
        }
        if let Some(size) = self.batch_size {
            config.operation.batch_size = Some(size);
            tracing::info!("🔧 Batch size overridden to: {}", size);
        }
        if let Some(endpoint) = &self.endpoint {
            config.remote.endpoint = Some(endpoint.clone());
        }
        if let Some(monitor) = self.monitor {
            config.monitoring.enabled = Some(monitor);
        }
    }
}
