use crate::config::toml_config::{TomlConfig, DEFAULT_TIMEOUT_SECONDS};
use crate::core::encoding::TextEncoding;
use crate::domain::model::OperationKind;
use crate::utils::error::{LoaderError, Result};
use crate::utils::validation::Validate;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything one run needs, resolved and validated up front.
///
/// Built once from the layered configuration and only read afterwards. The
/// read and write encodings are explicit values here rather than process-wide
/// settings, so nothing has to be restored when a run ends.
#[derive(Debug, Clone)]
pub struct OperationConfig {
    pub operation: OperationKind,
    pub entity: String,
    pub external_id_field: Option<String>,
    pub load_batch_size: usize,
    pub extract_batch_size: usize,
    pub query: Option<String>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub mapping_file: Option<PathBuf>,
    pub success_path: PathBuf,
    pub error_path: PathBuf,
    pub enable_extract_status_output: bool,
    pub read_encoding: TextEncoding,
    pub write_encoding: TextEncoding,
    pub delimiter: u8,
    pub monitor_enabled: bool,
}

impl OperationConfig {
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        config.validate()?;

        let operation = config.operation_kind()?;
        let entity = config
            .operation
            .entity
            .clone()
            .ok_or_else(|| LoaderError::MissingConfigError {
                field: "operation.entity".to_string(),
            })?;

        let read_encoding = TextEncoding::resolve(
            config.file_encoding(),
            config.encoding.read_utf8.unwrap_or(false),
        )?;
        let write_encoding = TextEncoding::resolve(
            config.file_encoding(),
            config.encoding.write_utf8.unwrap_or(false),
        )?;

        let directory = PathBuf::from(config.output.directory.as_deref().unwrap_or("."));
        let stamp = chrono::Local::now().format("%m%d%y%H%M%S%3f").to_string();
        let success_path = status_path(
            &directory,
            config.output.success_file.as_deref(),
            &format!("success{}.csv", stamp),
        );
        let error_path = status_path(
            &directory,
            config.output.error_file.as_deref(),
            &format!("error{}.csv", stamp),
        );

        Ok(Self {
            operation,
            entity,
            external_id_field: config.operation.external_id_field.clone(),
            load_batch_size: config.load_batch_size(),
            extract_batch_size: config.extract_batch_size(),
            query: config.operation.query.clone(),
            input_path: config.source.path.as_ref().map(PathBuf::from),
            output_path: config.output.path.as_ref().map(PathBuf::from),
            mapping_file: config.source.mapping_file.as_ref().map(PathBuf::from),
            success_path,
            error_path,
            enable_extract_status_output: config
                .output
                .enable_extract_status_output
                .unwrap_or(false),
            read_encoding,
            write_encoding,
            delimiter: config.delimiter()?,
            monitor_enabled: config.monitoring_enabled(),
        })
    }
}

fn status_path(directory: &Path, configured: Option<&str>, default_name: &str) -> PathBuf {
    match configured {
        Some(name) if Path::new(name).is_absolute() => PathBuf::from(name),
        Some(name) => directory.join(name),
        None => directory.join(default_name),
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl RemoteSettings {
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let endpoint = config
            .remote
            .endpoint
            .clone()
            .ok_or_else(|| LoaderError::MissingConfigError {
                field: "remote.endpoint".to_string(),
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_token: config
                .remote
                .access_token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            timeout: Duration::from_secs(
                config.remote.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            ),
        })
    }
}
