#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use small_dataloader::domain::model::{OperationKind, RowOutcome};
use small_dataloader::domain::ports::{
    BatchRequest, QueryPage, QueryRequest, RemoteClient, RemoteError,
};
use small_dataloader::{OperationConfig, TomlConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct StoreState {
    pub fields: Vec<String>,
    pub records: Vec<Map<String, Value>>,
    pub reject_names: Vec<String>,
    pub fail_on_submit: Option<usize>,
    pub fail_describe: bool,
    pub submitted: Vec<usize>,
    pub describes: usize,
    pub queries: Vec<Option<String>>,
    next_id: usize,
}

/// Record store kept in memory, shared between clones so a test can inspect
/// it after handing one clone to the engine.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new(fields: &[&str]) -> Self {
        let store = Self::default();
        store.state().fields = fields.iter().map(|f| f.to_string()).collect();
        store
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn reject_name(self, name: &str) -> Self {
        self.state().reject_names.push(name.to_string());
        self
    }

    pub fn fail_on_submit(self, call: usize) -> Self {
        self.state().fail_on_submit = Some(call);
        self
    }

    pub fn fail_describe(self) -> Self {
        self.state().fail_describe = true;
        self
    }

    pub fn submitted_batches(&self) -> Vec<usize> {
        self.state().submitted.clone()
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.state().records.clone()
    }

    pub fn value_of(&self, index: usize, field: &str) -> Option<String> {
        self.state()
            .records
            .get(index)
            .and_then(|r| r.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

fn to_map(record: &small_dataloader::TableRow) -> Map<String, Value> {
    record
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

impl StoreState {
    fn insert(&mut self, mut record: Map<String, Value>) -> String {
        self.next_id += 1;
        let id = format!("a0{:04}", self.next_id);
        record.insert("Id".to_string(), Value::String(id.clone()));
        self.records.push(record);
        id
    }

    fn position_by(&self, field: &str, value: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.get(field).and_then(Value::as_str) == Some(value))
    }

    fn apply(&mut self, operation: OperationKind, external_id: &str, record: Map<String, Value>) -> RowOutcome {
        let name = record.get("Name").and_then(Value::as_str).unwrap_or_default();
        if self.reject_names.iter().any(|r| r == name) {
            return RowOutcome::Failure {
                message: format!("FIELD_CUSTOM_VALIDATION_EXCEPTION: {} is not allowed", name),
            };
        }

        let id = record.get("Id").and_then(Value::as_str).map(str::to_string);
        match operation {
            OperationKind::Insert => RowOutcome::Success {
                id: Some(self.insert(record)),
                created: true,
            },
            OperationKind::Update | OperationKind::Delete => {
                let Some(idx) = id.as_deref().and_then(|id| self.position_by("Id", id)) else {
                    return RowOutcome::Failure {
                        message: "ENTITY_IS_DELETED: entity is deleted".to_string(),
                    };
                };
                if operation == OperationKind::Delete {
                    self.records.remove(idx);
                } else {
                    self.records[idx].extend(record);
                }
                RowOutcome::Success { id, created: false }
            }
            OperationKind::Upsert => {
                let key = record
                    .get(external_id)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default();
                match self.position_by(external_id, &key) {
                    Some(idx) => {
                        self.records[idx].extend(record);
                        RowOutcome::Success {
                            id: self.records[idx]
                                .get("Id")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            created: false,
                        }
                    }
                    None => RowOutcome::Success {
                        id: Some(self.insert(record)),
                        created: true,
                    },
                }
            }
            OperationKind::Extract | OperationKind::ExtractAll => RowOutcome::Failure {
                message: "not a load operation".to_string(),
            },
        }
    }
}

#[async_trait]
impl RemoteClient for InMemoryStore {
    fn endpoint(&self) -> &str {
        "memory://store"
    }

    async fn describe(&self, _entity: &str) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state();
        state.describes += 1;
        if state.fail_describe {
            return Err(RemoteError::Connection("login refused".to_string()));
        }
        Ok(state.fields.clone())
    }

    async fn submit_batch(&self, request: BatchRequest<'_>) -> Result<Vec<RowOutcome>, RemoteError> {
        let mut state = self.state();
        state.submitted.push(request.records.len());
        if state.fail_on_submit == Some(state.submitted.len()) {
            return Err(RemoteError::Connection("connection reset by peer".to_string()));
        }

        let external_id = request.external_id_field.unwrap_or("Id");
        Ok(request
            .records
            .iter()
            .map(|record| state.apply(request.operation, external_id, to_map(record)))
            .collect())
    }

    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryPage, RemoteError> {
        let mut state = self.state();
        state.queries.push(request.locator.map(str::to_string));

        let start: usize = request
            .locator
            .map(|l| l.parse().map_err(|_| RemoteError::Protocol(format!("bad locator {}", l))))
            .transpose()?
            .unwrap_or(0);
        let end = (start + request.batch_size).min(state.records.len());
        let done = end >= state.records.len();

        Ok(QueryPage {
            records: state.records[start.min(end)..end].to_vec(),
            done,
            next_locator: (!done).then(|| end.to_string()),
        })
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn resolve(toml: &str) -> OperationConfig {
    let config = TomlConfig::from_toml_str(toml).unwrap();
    OperationConfig::from_toml(&config).unwrap()
}

/// Load run reading `input`, writing `success.csv`/`error.csv` under `dir`.
pub fn load_toml(dir: &Path, kind: &str, input: &Path, batch_size: usize, extra: &str) -> String {
    format!(
        r#"
[operation]
kind = "{kind}"
entity = "Account"
batch_size = {batch_size}
{extra}

[source]
path = "{input}"

[output]
directory = "{dir}"
success_file = "success.csv"
error_file = "error.csv"

[remote]
endpoint = "http://localhost:8080"
"#,
        kind = kind,
        batch_size = batch_size,
        extra = extra,
        input = path_str(input),
        dir = path_str(dir),
    )
}

pub fn read_string(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
