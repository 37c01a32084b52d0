use crate::core::batch_loader::remote_failure;
use crate::core::field_mapper::ID_FIELD;
use crate::core::row_writer::RowWriter;
use crate::domain::model::{OperationKind, TableRow};
use crate::domain::ports::{QueryRequest, RemoteClient};
use crate::utils::error::{LoaderError, Result};
use crate::utils::progress::RunProgress;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Field list of a `SELECT ... FROM ...` query, in select order.
///
/// Commas inside parentheses do not split fields. `*` is rejected since the
/// output header has to be known before the first page arrives.
pub fn parse_select_fields(query: &str) -> Result<Vec<String>> {
    let invalid = |reason: &str| LoaderError::InvalidConfigValueError {
        field: "operation.query".to_string(),
        value: query.to_string(),
        reason: reason.to_string(),
    };

    let re = Regex::new(r"(?is)^\s*select\s+(.+?)\s+from\s+").map_err(|e| LoaderError::ConfigError {
        message: format!("invalid query pattern: {}", e),
    })?;
    let list = re
        .captures(query)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| invalid("expected SELECT <fields> FROM <entity>"))?
        .as_str();

    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);

    let fields: Vec<String> = fields.iter().map(|f| f.trim().to_string()).collect();
    if fields.iter().any(|f| f.is_empty()) {
        return Err(invalid("empty field in select list"));
    }
    if fields.iter().any(|f| f == "*") {
        return Err(invalid("'*' is not supported, list the fields explicitly"));
    }
    Ok(fields)
}

fn lookup<'v>(record: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    record.get(key).or_else(|| {
        record
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Value at a dotted path such as `Owner.Name`; missing steps give an empty
/// string.
pub fn field_value(record: &Map<String, Value>, path: &str) -> String {
    let mut parts = path.split('.');
    let mut current = parts.next().and_then(|first| lookup(record, first));
    for part in parts {
        current = match current {
            Some(Value::Object(nested)) => lookup(nested, part),
            _ => None,
        };
    }
    current.map(render).unwrap_or_default()
}

/// Flattens one query record into a row over `fields`.
pub fn flatten_record(fields: &Arc<[String]>, record: &Map<String, Value>) -> TableRow {
    let values = fields.iter().map(|f| field_value(record, f)).collect();
    TableRow::from_shared(Arc::clone(fields), values)
}

/// Pages through a query and writes every record as a row.
pub struct Extractor<'a, C: RemoteClient + ?Sized> {
    client: &'a C,
    query: &'a str,
    batch_size: usize,
    include_deleted: bool,
    fields: Arc<[String]>,
}

impl<'a, C: RemoteClient + ?Sized> Extractor<'a, C> {
    pub fn new(client: &'a C, operation: OperationKind, query: &'a str, batch_size: usize) -> Result<Self> {
        let fields = parse_select_fields(query)?;
        Ok(Self {
            client,
            query,
            batch_size,
            include_deleted: operation == OperationKind::ExtractAll,
            fields: fields.into(),
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns the number of pages fetched. Page indexes count from 1.
    pub async fn extract(
        &self,
        output: &mut RowWriter,
        mut status: Option<&mut RowWriter>,
        progress: &mut RunProgress,
    ) -> Result<usize> {
        let mut locator: Option<String> = None;
        let mut page_index = 0;

        loop {
            page_index += 1;
            let request = QueryRequest {
                query: self.query,
                batch_size: self.batch_size,
                include_deleted: self.include_deleted,
                locator: locator.as_deref(),
            };
            let page = self
                .client
                .query(request)
                .await
                .map_err(|e| remote_failure(page_index, e))?;

            for record in &page.records {
                let row = flatten_record(&self.fields, record);
                output.write_row(&row)?;
                if let Some(sink) = status.as_deref_mut() {
                    let id = field_value(record, ID_FIELD);
                    sink.write_success(&row, &id, OperationKind::Extract.success_status(false))?;
                }
            }
            progress.record_batch(page_index, page.records.len(), 0);

            if page.done {
                return Ok(page_index);
            }
            locator = match page.next_locator {
                Some(next) => Some(next),
                None => {
                    return Err(LoaderError::RemoteProtocol {
                        batch_index: page_index,
                        message: "page is not done but carries no locator".to_string(),
                    })
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoding::TextEncoding;
    use crate::domain::model::RowOutcome;
    use crate::domain::ports::{BatchRequest, QueryPage, RemoteError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_select_fields() {
        assert_eq!(
            parse_select_fields("SELECT Id, Name, Owner.Name FROM Account WHERE Name != ''").unwrap(),
            vec!["Id", "Name", "Owner.Name"]
        );
        assert_eq!(
            parse_select_fields("select\n  Id,\n  FORMAT(Amount, 2)\nfrom Opportunity").unwrap(),
            vec!["Id", "FORMAT(Amount, 2)"]
        );
        assert!(parse_select_fields("SELECT * FROM Account").is_err());
        assert!(parse_select_fields("SELECT Id,, Name FROM Account").is_err());
        assert!(parse_select_fields("DELETE FROM Account").is_err());
    }

    #[test]
    fn test_flatten_record() {
        let fields: Arc<[String]> = vec![
            "Id".to_string(),
            "Owner.Name".to_string(),
            "amount".to_string(),
            "IsActive".to_string(),
            "Parent.Id".to_string(),
            "Missing".to_string(),
        ]
        .into();
        let record = object(json!({
            "Id": "001A",
            "Owner": {"Name": "Kim"},
            "Amount": 12.5,
            "IsActive": true,
            "Parent": null
        }));

        let row = flatten_record(&fields, &record);
        assert_eq!(row.values(), &["001A", "Kim", "12.5", "true", "", ""]);
    }

    struct PagedClient {
        pages: Vec<std::result::Result<QueryPage, RemoteError>>,
        requests: Mutex<Vec<(Option<String>, bool)>>,
    }

    #[async_trait]
    impl RemoteClient for PagedClient {
        fn endpoint(&self) -> &str {
            "paged://"
        }

        async fn describe(&self, _entity: &str) -> std::result::Result<Vec<String>, RemoteError> {
            Ok(vec![])
        }

        async fn submit_batch(
            &self,
            _request: BatchRequest<'_>,
        ) -> std::result::Result<Vec<RowOutcome>, RemoteError> {
            Ok(vec![])
        }

        async fn query(&self, request: QueryRequest<'_>) -> std::result::Result<QueryPage, RemoteError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push((request.locator.map(str::to_string), request.include_deleted));
            match &self.pages[requests.len() - 1] {
                Ok(page) => Ok(page.clone()),
                Err(_) => Err(RemoteError::Connection("timed out".to_string())),
            }
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> std::result::Result<QueryPage, RemoteError> {
        Ok(QueryPage {
            records: ids.iter().map(|id| object(json!({"Id": id, "Name": format!("name {}", id)}))).collect(),
            done: next.is_none(),
            next_locator: next.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_extract_follows_locator() {
        let dir = TempDir::new().unwrap();
        let client = PagedClient {
            pages: vec![page(&["1", "2"], Some("L1")), page(&["3"], None)],
            requests: Mutex::new(Vec::new()),
        };
        let extractor =
            Extractor::new(&client, OperationKind::ExtractAll, "SELECT Name, Id FROM Account", 2).unwrap();

        let out_path = dir.path().join("out.csv");
        let status_path = dir.path().join("status.csv");
        let mut output =
            RowWriter::create(&out_path, TextEncoding::utf8(), b',', extractor.fields().to_vec()).unwrap();
        let mut status =
            RowWriter::success_sink(&status_path, TextEncoding::utf8(), b',', extractor.fields()).unwrap();
        let mut progress = RunProgress::new(false);

        let pages = extractor
            .extract(&mut output, Some(&mut status), &mut progress)
            .await
            .unwrap();
        output.finish().unwrap();
        status.finish().unwrap();

        assert_eq!(pages, 2);
        assert_eq!(
            *client.requests.lock().unwrap(),
            vec![(None, true), (Some("L1".to_string()), true)]
        );
        assert_eq!(
            std::fs::read_to_string(&out_path).unwrap(),
            "Name,Id\nname 1,1\nname 2,2\nname 3,3\n"
        );
        assert_eq!(
            std::fs::read_to_string(&status_path).unwrap(),
            "ID,Name,Id,STATUS\n1,name 1,1,Item Extracted\n2,name 2,2,Item Extracted\n3,name 3,3,Item Extracted\n"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_names_page() {
        let dir = TempDir::new().unwrap();
        let client = PagedClient {
            pages: vec![
                page(&["1"], Some("L1")),
                Err(RemoteError::Connection(String::new())),
            ],
            requests: Mutex::new(Vec::new()),
        };
        let extractor = Extractor::new(&client, OperationKind::Extract, "SELECT Id FROM Account", 1).unwrap();
        let mut output =
            RowWriter::create(dir.path().join("out.csv"), TextEncoding::utf8(), b',', vec!["Id".to_string()])
                .unwrap();
        let mut progress = RunProgress::new(false);

        let err = extractor.extract(&mut output, None, &mut progress).await.unwrap_err();
        assert!(matches!(err, LoaderError::RemoteConnection { batch_index: 2, .. }));
        assert_eq!(output.rows_written(), 1);
    }

    #[tokio::test]
    async fn test_missing_locator_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let client = PagedClient {
            pages: vec![Ok(QueryPage {
                records: vec![],
                done: false,
                next_locator: None,
            })],
            requests: Mutex::new(Vec::new()),
        };
        let extractor = Extractor::new(&client, OperationKind::Extract, "SELECT Id FROM Account", 1).unwrap();
        let mut output =
            RowWriter::create(dir.path().join("out.csv"), TextEncoding::utf8(), b',', vec!["Id".to_string()])
                .unwrap();
        let mut progress = RunProgress::new(false);

        let err = extractor.extract(&mut output, None, &mut progress).await.unwrap_err();
        assert!(matches!(err, LoaderError::RemoteProtocol { batch_index: 1, .. }));
    }
}
