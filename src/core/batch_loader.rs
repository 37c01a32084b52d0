use crate::core::batch::Batches;
use crate::core::field_mapper::ResolvedMapping;
use crate::core::row_writer::RowWriter;
use crate::domain::model::{BatchEntry, BatchResult, OperationKind, RowOutcome, TableRow};
use crate::domain::ports::{BatchRequest, RemoteClient, RemoteError};
use crate::utils::error::{LoaderError, Result};
use crate::utils::progress::RunProgress;

/// Submits fixed-size batches of rows for one operation and routes every
/// per-row outcome to the success or error sink.
///
/// Batch indexes count from 1.
pub struct BatchLoader<'a, C: RemoteClient + ?Sized> {
    client: &'a C,
    operation: OperationKind,
    entity: &'a str,
    external_id_field: Option<&'a str>,
    batch_size: usize,
    mapping: &'a ResolvedMapping,
}

impl<'a, C: RemoteClient + ?Sized> BatchLoader<'a, C> {
    pub fn new(
        client: &'a C,
        operation: OperationKind,
        entity: &'a str,
        batch_size: usize,
        mapping: &'a ResolvedMapping,
    ) -> Self {
        Self {
            client,
            operation,
            entity,
            external_id_field: None,
            batch_size,
            mapping,
        }
    }

    pub fn with_external_id_field(mut self, field: Option<&'a str>) -> Self {
        self.external_id_field = field;
        self
    }

    /// Runs every batch in order and returns how many were submitted.
    ///
    /// The first read error or remote failure stops the run; rows already
    /// dispatched stay in their sinks.
    pub async fn load<I>(
        &self,
        rows: I,
        success: &mut RowWriter,
        error: &mut RowWriter,
        progress: &mut RunProgress,
    ) -> Result<usize>
    where
        I: Iterator<Item = Result<TableRow>>,
    {
        let mut submitted = 0;

        for (offset, batch) in Batches::new(rows, self.batch_size).enumerate() {
            let batch_index = offset + 1;
            let rows = batch?;

            let result = self.submit(batch_index, rows).await?;
            Self::dispatch(self.operation, &result, success, error)?;

            progress.record_batch(
                batch_index,
                result.success_count(),
                result.failure_count(),
            );
            submitted += 1;
        }

        Ok(submitted)
    }

    /// Maps and submits one batch; outcomes come back paired with the source
    /// rows in input order.
    pub async fn submit(&self, batch_index: usize, rows: Vec<TableRow>) -> Result<BatchResult> {
        let records: Vec<TableRow> = rows.iter().map(|row| self.mapping.map_row(row)).collect();

        tracing::debug!(
            "📤 Submitting batch {} ({} rows) for {} on {}",
            batch_index,
            records.len(),
            self.operation,
            self.entity
        );

        let request = BatchRequest {
            operation: self.operation,
            entity: self.entity,
            external_id_field: self
                .external_id_field
                .filter(|_| self.operation == OperationKind::Upsert),
            records: &records,
        };

        let outcomes = self
            .client
            .submit_batch(request)
            .await
            .map_err(|e| remote_failure(batch_index, e))?;

        if outcomes.len() != rows.len() {
            return Err(LoaderError::RemoteProtocol {
                batch_index,
                message: format!(
                    "expected {} results, received {}",
                    rows.len(),
                    outcomes.len()
                ),
            });
        }

        let entries = rows
            .into_iter()
            .zip(outcomes)
            .map(|(row, outcome)| BatchEntry { row, outcome })
            .collect();

        Ok(BatchResult {
            batch_index,
            entries,
        })
    }

    fn dispatch(
        operation: OperationKind,
        result: &BatchResult,
        success: &mut RowWriter,
        error: &mut RowWriter,
    ) -> Result<()> {
        for entry in &result.entries {
            match &entry.outcome {
                RowOutcome::Success { id, created } => success.write_success(
                    &entry.row,
                    id.as_deref().unwrap_or_default(),
                    operation.success_status(*created),
                )?,
                RowOutcome::Failure { message } => {
                    tracing::debug!("Row rejected in batch {}: {}", result.batch_index, message);
                    error.write_error(&entry.row, message)?
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn remote_failure(batch_index: usize, err: RemoteError) -> LoaderError {
    match err {
        RemoteError::Protocol(message) => LoaderError::RemoteProtocol {
            batch_index,
            message,
        },
        other => LoaderError::RemoteConnection {
            batch_index,
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoding::TextEncoding;
    use crate::core::field_mapper::FieldMapping;
    use crate::domain::ports::{QueryPage, QueryRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Rejects rows whose `Name` is in `reject`, fails the connection on
    /// `fail_on_call`.
    #[derive(Default)]
    struct ScriptedClient {
        reject: Vec<String>,
        fail_on_call: Option<usize>,
        short_response: bool,
        calls: Mutex<Vec<usize>>,
        external_ids: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl RemoteClient for ScriptedClient {
        fn endpoint(&self) -> &str {
            "scripted://"
        }

        async fn describe(&self, _entity: &str) -> std::result::Result<Vec<String>, RemoteError> {
            Ok(vec![])
        }

        async fn submit_batch(
            &self,
            request: BatchRequest<'_>,
        ) -> std::result::Result<Vec<RowOutcome>, RemoteError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(request.records.len());
                calls.len()
            };
            self.external_ids
                .lock()
                .unwrap()
                .push(request.external_id_field.map(str::to_string));
            if self.fail_on_call == Some(call) {
                return Err(RemoteError::Connection("connection reset".to_string()));
            }

            let mut outcomes: Vec<RowOutcome> = request
                .records
                .iter()
                .map(|record| {
                    let name = record.get("Name").unwrap_or_default();
                    if self.reject.iter().any(|r| r == name) {
                        RowOutcome::Failure {
                            message: format!("duplicate value: {}", name),
                        }
                    } else {
                        RowOutcome::Success {
                            id: Some(format!("001{}", name)),
                            created: true,
                        }
                    }
                })
                .collect();
            if self.short_response {
                outcomes.pop();
            }
            Ok(outcomes)
        }

        async fn query(
            &self,
            _request: QueryRequest<'_>,
        ) -> std::result::Result<QueryPage, RemoteError> {
            Ok(QueryPage::default())
        }
    }

    struct Fixture {
        dir: TempDir,
        mapping: ResolvedMapping,
        columns: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let columns = vec!["Name".to_string(), "City".to_string()];
            let mapping = FieldMapping::auto_match(&columns, &[])
                .resolve(&columns)
                .unwrap();
            Self {
                dir: TempDir::new().unwrap(),
                mapping,
                columns,
            }
        }

        fn rows(&self, count: usize) -> Vec<Result<TableRow>> {
            (1..=count)
                .map(|i| Ok(TableRow::from_pairs([("Name", format!("n{}", i)), ("City", "Oslo".to_string())])))
                .collect()
        }

        fn sinks(&self) -> (RowWriter, RowWriter) {
            let success = RowWriter::success_sink(
                self.dir.path().join("success.csv"),
                TextEncoding::utf8(),
                b',',
                &self.columns,
            )
            .unwrap();
            let error = RowWriter::error_sink(
                self.dir.path().join("error.csv"),
                TextEncoding::utf8(),
                b',',
                &self.columns,
            )
            .unwrap();
            (success, error)
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.dir.path().join(name)).unwrap()
        }
    }

    #[tokio::test]
    async fn test_partial_failure_routes_rows() {
        let fixture = Fixture::new();
        let client = ScriptedClient {
            reject: vec!["n2".to_string()],
            ..Default::default()
        };
        let (mut success, mut error) = fixture.sinks();
        let mut progress = RunProgress::new(false);

        let loader = BatchLoader::new(&client, OperationKind::Insert, "Account", 3, &fixture.mapping);
        let batches = loader
            .load(fixture.rows(3).into_iter(), &mut success, &mut error, &mut progress)
            .await
            .unwrap();
        success.finish().unwrap();
        error.finish().unwrap();

        assert_eq!(batches, 1);
        assert_eq!(
            fixture.read("success.csv"),
            "ID,Name,City,STATUS\n001n1,n1,Oslo,Item Created\n001n3,n3,Oslo,Item Created\n"
        );
        assert_eq!(fixture.read("error.csv"), "Name,City,ERROR\nn2,Oslo,duplicate value: n2\n");
        assert_eq!(progress.counts().successes, 2);
        assert_eq!(progress.counts().errors, 1);
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let fixture = Fixture::new();
        let client = ScriptedClient::default();
        let (mut success, mut error) = fixture.sinks();
        let mut progress = RunProgress::new(false);

        let loader = BatchLoader::new(&client, OperationKind::Insert, "Account", 4, &fixture.mapping);
        let batches = loader
            .load(fixture.rows(10).into_iter(), &mut success, &mut error, &mut progress)
            .await
            .unwrap();

        assert_eq!(batches, 3);
        assert_eq!(*client.calls.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(success.rows_written(), 10);
        assert_eq!(error.rows_written(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_at_batch() {
        let fixture = Fixture::new();
        let client = ScriptedClient {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let (mut success, mut error) = fixture.sinks();
        let mut progress = RunProgress::new(false);

        let loader = BatchLoader::new(&client, OperationKind::Insert, "Account", 2, &fixture.mapping);
        let err = loader
            .load(fixture.rows(6).into_iter(), &mut success, &mut error, &mut progress)
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::RemoteConnection { batch_index: 2, .. }));
        assert_eq!(client.calls.lock().unwrap().len(), 2);
        assert_eq!(success.rows_written(), 2);
    }

    #[tokio::test]
    async fn test_outcome_count_mismatch_is_protocol_error() {
        let fixture = Fixture::new();
        let client = ScriptedClient {
            short_response: true,
            ..Default::default()
        };
        let (mut success, mut error) = fixture.sinks();
        let mut progress = RunProgress::new(false);

        let loader = BatchLoader::new(&client, OperationKind::Insert, "Account", 5, &fixture.mapping);
        let err = loader
            .load(fixture.rows(3).into_iter(), &mut success, &mut error, &mut progress)
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::RemoteProtocol { batch_index: 1, .. }));
        assert_eq!(success.rows_written(), 0);
    }

    #[tokio::test]
    async fn test_external_id_field_is_sent_only_for_upsert() {
        let fixture = Fixture::new();
        let mut progress = RunProgress::new(false);

        for operation in [OperationKind::Insert, OperationKind::Upsert] {
            let client = ScriptedClient::default();
            let (mut success, mut error) = fixture.sinks();
            BatchLoader::new(&client, operation, "Account", 10, &fixture.mapping)
                .with_external_id_field(Some("Name"))
                .load(fixture.rows(2).into_iter(), &mut success, &mut error, &mut progress)
                .await
                .unwrap();

            let expected = (operation == OperationKind::Upsert).then(|| "Name".to_string());
            assert_eq!(*client.external_ids.lock().unwrap(), vec![expected], "{}", operation);
        }
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let fixture = Fixture::new();
        let client = ScriptedClient::default();
        let (mut success, mut error) = fixture.sinks();
        let mut progress = RunProgress::new(false);

        let mut rows = fixture.rows(2);
        rows.push(Err(LoaderError::MissingHeader {
            path: "broken.csv".into(),
        }));

        let loader = BatchLoader::new(&client, OperationKind::Insert, "Account", 10, &fixture.mapping);
        let err = loader
            .load(rows.into_iter(), &mut success, &mut error, &mut progress)
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::MissingHeader { .. }));
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
