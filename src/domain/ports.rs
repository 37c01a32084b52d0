use crate::domain::model::{OperationKind, RowOutcome, TableRow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub operation: OperationKind,
    pub entity: &'a str,
    pub external_id_field: Option<&'a str>,
    pub records: &'a [TableRow],
}

#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
    pub batch_size: usize,
    pub include_deleted: bool,
    pub locator: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub records: Vec<Map<String, Value>>,
    pub done: bool,
    pub next_locator: Option<String>,
}

/// The remote platform as seen by a run: describe an entity, submit a batch,
/// page through a query.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn describe(&self, entity: &str) -> Result<Vec<String>, RemoteError>;

    /// Must return exactly one outcome per record, in record order.
    async fn submit_batch(&self, request: BatchRequest<'_>)
        -> Result<Vec<RowOutcome>, RemoteError>;

    async fn query(&self, request: QueryRequest<'_>) -> Result<QueryPage, RemoteError>;
}
