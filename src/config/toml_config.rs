use crate::domain::model::OperationKind;
use crate::utils::error::{LoaderError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_LOAD_BATCH_SIZE: usize = 200;
pub const DEFAULT_EXTRACT_BATCH_SIZE: usize = 500;
pub const MAX_LOAD_BATCH_SIZE: usize = 10_000;
pub const MAX_EXTRACT_BATCH_SIZE: usize = 2_000;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub operation: OperationSection,
    pub source: SourceSection,
    pub output: OutputSection,
    pub encoding: EncodingSection,
    pub remote: RemoteSection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationSection {
    pub kind: Option<String>,
    pub entity: Option<String>,
    pub external_id_field: Option<String>,
    pub batch_size: Option<usize>,
    pub extract_batch_size: Option<usize>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub path: Option<String>,
    pub mapping_file: Option<String>,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub directory: Option<String>,
    pub path: Option<String>,
    pub success_file: Option<String>,
    pub error_file: Option<String>,
    pub enable_extract_status_output: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingSection {
    pub file_encoding: Option<String>,
    pub read_utf8: Option<bool>,
    pub write_utf8: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub enabled: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| LoaderError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CRM_TOKEN})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| LoaderError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn operation_kind(&self) -> Result<OperationKind> {
        let kind = validation::validate_required_field("operation.kind", &self.operation.kind)?;
        kind.parse::<OperationKind>()
            .map_err(|reason| LoaderError::InvalidConfigValueError {
                field: "operation.kind".to_string(),
                value: kind.clone(),
                reason,
            })
    }

    pub fn load_batch_size(&self) -> usize {
        self.operation.batch_size.unwrap_or(DEFAULT_LOAD_BATCH_SIZE)
    }

    pub fn extract_batch_size(&self) -> usize {
        self.operation
            .extract_batch_size
            .unwrap_or(DEFAULT_EXTRACT_BATCH_SIZE)
    }

    pub fn file_encoding(&self) -> &str {
        self.encoding.file_encoding.as_deref().unwrap_or("UTF-8")
    }

    pub fn delimiter(&self) -> Result<u8> {
        let raw = self.source.delimiter.as_deref().unwrap_or(",");
        let delimiter = match raw {
            "\\t" | "tab" => "\t",
            other => other,
        };
        match delimiter.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(LoaderError::InvalidConfigValueError {
                field: "source.delimiter".to_string(),
                value: raw.to_string(),
                reason: "Delimiter must be a single ASCII character".to_string(),
            }),
        }
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled.unwrap_or(false)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        let kind = self.operation_kind()?;

        let entity = validation::validate_required_field("operation.entity", &self.operation.entity)?;
        validation::validate_non_empty_string("operation.entity", entity)?;

        let endpoint = validation::validate_required_field("remote.endpoint", &self.remote.endpoint)?;
        validation::validate_url("remote.endpoint", endpoint)?;

        validation::validate_range(
            "operation.batch_size",
            self.load_batch_size(),
            1,
            MAX_LOAD_BATCH_SIZE,
        )?;
        validation::validate_range(
            "operation.extract_batch_size",
            self.extract_batch_size(),
            1,
            MAX_EXTRACT_BATCH_SIZE,
        )?;
        if let Some(timeout) = self.remote.timeout_seconds {
            validation::validate_range("remote.timeout_seconds", timeout, 1, 3_600)?;
        }

        if kind.is_extract() {
            let query = validation::validate_required_field("operation.query", &self.operation.query)?;
            validation::validate_non_empty_string("operation.query", query)?;
            let output = validation::validate_required_field("output.path", &self.output.path)?;
            validation::validate_path("output.path", output)?;
        } else {
            let input = validation::validate_required_field("source.path", &self.source.path)?;
            validation::validate_path("source.path", input)?;
            validation::validate_file_extension("source.path", input, &["csv", "tsv", "txt"])?;
        }

        if kind == OperationKind::Upsert {
            let field = validation::validate_required_field(
                "operation.external_id_field",
                &self.operation.external_id_field,
            )?;
            validation::validate_non_empty_string("operation.external_id_field", field)?;
        }

        if let Some(mapping) = &self.source.mapping_file {
            validation::validate_path("source.mapping_file", mapping)?;
        }
        if let Some(dir) = &self.output.directory {
            validation::validate_path("output.directory", dir)?;
        }

        self.delimiter()?;
        crate::core::encoding::TextEncoding::for_label(self.file_encoding())?;

        if let Some(format) = &self.monitoring.log_format {
            if crate::utils::logger::LogFormat::from_name(format).is_none() {
                return Err(LoaderError::InvalidConfigValueError {
                    field: "monitoring.log_format".to_string(),
                    value: format.clone(),
                    reason: "Valid formats: compact, json".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const UPSERT_CONFIG: &str = r#"
[operation]
kind = "upsert"
entity = "Account"
external_id_field = "External_Id__c"
batch_size = 50

[source]
path = "./data/accounts.csv"
mapping_file = "./data/accounts.sdl"

[output]
directory = "./status"

[encoding]
file_encoding = "Shift_JIS"
read_utf8 = true

[remote]
endpoint = "https://crm.example.com/api"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = TomlConfig::from_toml_str(UPSERT_CONFIG).unwrap();

        assert_eq!(config.operation_kind().unwrap(), OperationKind::Upsert);
        assert_eq!(config.operation.entity.as_deref(), Some("Account"));
        assert_eq!(config.load_batch_size(), 50);
        assert_eq!(config.extract_batch_size(), DEFAULT_EXTRACT_BATCH_SIZE);
        assert_eq!(config.file_encoding(), "Shift_JIS");
        assert_eq!(config.delimiter().unwrap(), b',');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SMALL_DATALOADER_TEST_TOKEN", "secret-token");

        let config = TomlConfig::from_toml_str(
            r#"
[remote]
endpoint = "https://crm.example.com"
access_token = "${SMALL_DATALOADER_TEST_TOKEN}"
"#,
        )
        .unwrap();
        assert_eq!(config.remote.access_token.as_deref(), Some("secret-token"));

        std::env::remove_var("SMALL_DATALOADER_TEST_TOKEN");
    }

    #[test]
    fn test_upsert_requires_external_id_field() {
        let content = UPSERT_CONFIG.replace("external_id_field = \"External_Id__c\"\n", "");
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(LoaderError::MissingConfigError { field }) if field == "operation.external_id_field"
        ));
    }

    #[test]
    fn test_extract_requires_query_and_output() {
        let config = TomlConfig::from_toml_str(
            r#"
[operation]
kind = "extract"
entity = "Account"

[remote]
endpoint = "https://crm.example.com"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(LoaderError::MissingConfigError { field }) if field == "operation.query"
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_encoding = UPSERT_CONFIG.replace("Shift_JIS", "x-unknown");
        assert!(matches!(
            TomlConfig::from_toml_str(&bad_encoding).unwrap().validate(),
            Err(LoaderError::UnsupportedEncoding { .. })
        ));

        let bad_batch = UPSERT_CONFIG.replace("batch_size = 50", "batch_size = 0");
        assert!(TomlConfig::from_toml_str(&bad_batch).unwrap().validate().is_err());

        let bad_kind = UPSERT_CONFIG.replace("kind = \"upsert\"", "kind = \"merge\"");
        assert!(TomlConfig::from_toml_str(&bad_kind).unwrap().validate().is_err());
    }

    #[test]
    fn test_tab_delimiter_alias() {
        let config = TomlConfig::from_toml_str("[source]\ndelimiter = \"tab\"\n").unwrap();
        assert_eq!(config.delimiter().unwrap(), b'\t');
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(UPSERT_CONFIG.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.remote.endpoint.as_deref(), Some("https://crm.example.com/api"));
    }
}
