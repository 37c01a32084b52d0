use crate::domain::ports::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error on {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unsupported text encoding: {label}")]
    UnsupportedEncoding { label: String },

    #[error("Encoding error in {}: {detail}", path.display())]
    EncodingError { path: PathBuf, detail: String },

    #[error("No header row in {}", path.display())]
    MissingHeader { path: PathBuf },

    #[error("Empty column name in {} at column {column}", path.display())]
    EmptyColumnName { path: PathBuf, column: usize },

    #[error("Malformed row in {} at line {line}: expected {expected} fields, found {found}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Remote service unavailable at {endpoint}: {source}")]
    RemoteUnavailable {
        endpoint: String,
        #[source]
        source: RemoteError,
    },

    #[error("Remote connection failed at batch {batch_index}: {source}")]
    RemoteConnection {
        batch_index: usize,
        #[source]
        source: RemoteError,
    },

    #[error("Unexpected remote response at batch {batch_index}: {message}")]
    RemoteProtocol { batch_index: usize, message: String },

    #[error("Field mapping error: {message}")]
    MappingError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Encoding,
    Data,
    Remote,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl LoaderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LoaderError::IoError { .. } => ErrorCategory::Io,
            LoaderError::UnsupportedEncoding { .. } | LoaderError::EncodingError { .. } => {
                ErrorCategory::Encoding
            }
            LoaderError::CsvError(_)
            | LoaderError::SerializationError(_)
            | LoaderError::MissingHeader { .. }
            | LoaderError::EmptyColumnName { .. }
            | LoaderError::MalformedRow { .. }
            | LoaderError::MappingError { .. } => ErrorCategory::Data,
            LoaderError::RemoteUnavailable { .. }
            | LoaderError::RemoteConnection { .. }
            | LoaderError::RemoteProtocol { .. } => ErrorCategory::Remote,
            LoaderError::ConfigError { .. }
            | LoaderError::MissingConfigError { .. }
            | LoaderError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 網路問題通常可以稍後重試
            ErrorCategory::Remote => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Encoding | ErrorCategory::Configuration => {
                ErrorSeverity::High
            }
            ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            LoaderError::IoError { path, .. } => format!(
                "Check that {} exists and that the process can read and write it",
                path.display()
            ),
            LoaderError::UnsupportedEncoding { .. } => {
                "Use a WHATWG encoding label such as UTF-8, Shift_JIS or windows-1252".to_string()
            }
            LoaderError::EncodingError { .. } => {
                "Set file_encoding to the file's real charset, or enable read_utf8/write_utf8"
                    .to_string()
            }
            LoaderError::MissingHeader { .. } => {
                "The first line of the input file must name its columns".to_string()
            }
            LoaderError::EmptyColumnName { column, .. } => {
                format!("Give column {} a name in the header line", column)
            }
            LoaderError::MalformedRow { .. } | LoaderError::CsvError(_) => {
                "Make every data row carry the same number of fields as the header".to_string()
            }
            LoaderError::SerializationError(_) | LoaderError::RemoteProtocol { .. } => {
                "Verify the remote endpoint speaks the expected JSON protocol".to_string()
            }
            LoaderError::RemoteUnavailable { .. } | LoaderError::RemoteConnection { .. } => {
                "Check network connectivity and credentials, then rerun the remaining rows from the input file"
                    .to_string()
            }
            LoaderError::MappingError { .. } => {
                "Review the mapping file so every required field has a source column".to_string()
            }
            LoaderError::ConfigError { .. }
            | LoaderError::MissingConfigError { .. }
            | LoaderError::InvalidConfigValueError { .. } => {
                "Fix the configuration file or command-line overrides and try again".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Io => format!("File access failed: {}", self),
            ErrorCategory::Encoding => format!("Text encoding problem: {}", self),
            ErrorCategory::Data => format!("Input data problem: {}", self),
            ErrorCategory::Remote => format!("Remote service problem: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;
