use crate::config::OperationConfig;
use crate::core::batch_loader::BatchLoader;
use crate::core::extractor::Extractor;
use crate::core::field_mapper::FieldMapping;
use crate::core::row_reader::RowReader;
use crate::core::row_writer::RowWriter;
use crate::domain::model::RunSummary;
use crate::domain::ports::RemoteClient;
use crate::utils::error::{LoaderError, Result};
use crate::utils::progress::RunProgress;

/// Runs one configured operation against a remote client.
pub struct LoaderEngine<C: RemoteClient> {
    client: C,
    config: OperationConfig,
}

impl<C: RemoteClient> LoaderEngine<C> {
    pub fn new(client: C, config: OperationConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let config = &self.config;
        let mut progress = RunProgress::new(config.monitor_enabled);

        tracing::info!(
            "🚀 Starting {} on {} (read: {}, write: {})",
            config.operation,
            config.entity,
            config.read_encoding,
            config.write_encoding
        );
        progress.log_stats("start");

        tracing::info!("🔌 Connecting to {}", self.client.endpoint());
        let destination_fields = self.client.describe(&config.entity).await.map_err(|source| {
            LoaderError::RemoteUnavailable {
                endpoint: self.client.endpoint().to_string(),
                source,
            }
        })?;
        tracing::debug!("{} exposes {} fields", config.entity, destination_fields.len());

        let summary = if config.operation.is_extract() {
            self.extract(&mut progress).await?
        } else {
            self.load(&destination_fields, &mut progress).await?
        };

        progress.log_final();
        tracing::info!(
            "✅ {} finished: {} processed, {} ok, {} failed",
            summary.operation,
            summary.processed,
            summary.successes,
            summary.errors
        );
        Ok(summary)
    }

    async fn load(&self, destination_fields: &[String], progress: &mut RunProgress) -> Result<RunSummary> {
        let config = &self.config;
        let input = config
            .input_path
            .as_ref()
            .ok_or_else(|| LoaderError::MissingConfigError {
                field: "source.path".to_string(),
            })?;

        tracing::info!("📥 Reading {}", input.display());
        let reader = RowReader::open(input, config.read_encoding, config.delimiter)?;
        let columns = reader.columns().to_vec();

        let mapping = match &config.mapping_file {
            Some(path) => {
                tracing::info!("🗺️ Using mapping file {}", path.display());
                FieldMapping::from_file(path)?
            }
            None => FieldMapping::auto_match(&columns, destination_fields),
        };
        let resolved = mapping.resolve(&columns)?;
        resolved.validate_for(config.operation, config.external_id_field.as_deref())?;
        tracing::debug!("Mapped fields: {:?}", resolved.destination_fields());

        let mut success = RowWriter::success_sink(
            &config.success_path,
            config.write_encoding,
            config.delimiter,
            &columns,
        )?;
        let mut error = RowWriter::error_sink(
            &config.error_path,
            config.write_encoding,
            config.delimiter,
            &columns,
        )?;

        let loader = BatchLoader::new(
            &self.client,
            config.operation,
            &config.entity,
            config.load_batch_size,
            &resolved,
        )
        .with_external_id_field(config.external_id_field.as_deref());

        let outcome = loader.load(reader, &mut success, &mut error, progress).await;
        // 失敗時也要把已寫入的列刷到檔案
        let success_finished = success.finish();
        let error_finished = error.finish();
        let batches = outcome?;
        success_finished?;
        error_finished?;

        let counts = progress.counts();
        tracing::info!("📁 Success file: {}", config.success_path.display());
        tracing::info!("📁 Error file: {}", config.error_path.display());

        Ok(RunSummary {
            operation: config.operation,
            batches,
            processed: counts.processed,
            successes: counts.successes,
            errors: counts.errors,
            output_path: None,
            success_path: Some(config.success_path.clone()),
            error_path: Some(config.error_path.clone()),
        })
    }

    async fn extract(&self, progress: &mut RunProgress) -> Result<RunSummary> {
        let config = &self.config;
        let query = config
            .query
            .as_deref()
            .ok_or_else(|| LoaderError::MissingConfigError {
                field: "operation.query".to_string(),
            })?;
        let output_path = config
            .output_path
            .clone()
            .ok_or_else(|| LoaderError::MissingConfigError {
                field: "output.path".to_string(),
            })?;

        let extractor = Extractor::new(&self.client, config.operation, query, config.extract_batch_size)?;
        let mut output = RowWriter::create(
            &output_path,
            config.write_encoding,
            config.delimiter,
            extractor.fields().to_vec(),
        )?;

        let mut status_sinks = if config.enable_extract_status_output {
            Some((
                RowWriter::success_sink(
                    &config.success_path,
                    config.write_encoding,
                    config.delimiter,
                    extractor.fields(),
                )?,
                RowWriter::error_sink(
                    &config.error_path,
                    config.write_encoding,
                    config.delimiter,
                    extractor.fields(),
                )?,
            ))
        } else {
            None
        };

        tracing::info!("📤 Extracting into {}", output_path.display());
        let outcome = extractor
            .extract(
                &mut output,
                status_sinks.as_mut().map(|(success, _)| success),
                progress,
            )
            .await;

        let output_finished = output.finish();
        let (success_path, error_path) = match status_sinks {
            Some((success, error)) => {
                let finished = success.finish().and(error.finish());
                if outcome.is_ok() {
                    finished?;
                }
                (
                    Some(config.success_path.clone()),
                    Some(config.error_path.clone()),
                )
            }
            None => (None, None),
        };
        let pages = outcome?;
        output_finished?;

        let counts = progress.counts();
        Ok(RunSummary {
            operation: config.operation,
            batches: pages,
            processed: counts.processed,
            successes: counts.successes,
            errors: counts.errors,
            output_path: Some(output_path),
            success_path,
            error_path,
        })
    }
}
