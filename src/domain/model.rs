use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// One record flowing through a run: an ordered mapping of column name to value.
///
/// The column list is shared by every row produced from the same header, so all
/// rows of a run carry the same column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl TableRow {
    /// Returns `None` when the value count does not match the column count.
    pub fn new(columns: Arc<[String]>, values: Vec<String>) -> Option<Self> {
        if columns.len() != values.len() {
            return None;
        }
        Some(Self { columns, values })
    }

    /// Caller guarantees one value per column.
    pub(crate) fn from_shared(columns: Arc<[String]>, values: Vec<String>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (columns, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| self.values[idx].as_str())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// 依欄位順序序列化，遠端收到的 JSON 與檔案欄位順序一致
impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Upsert,
    Delete,
    Extract,
    ExtractAll,
}

impl OperationKind {
    pub fn is_extract(self) -> bool {
        matches!(self, OperationKind::Extract | OperationKind::ExtractAll)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Upsert => "upsert",
            OperationKind::Delete => "delete",
            OperationKind::Extract => "extract",
            OperationKind::ExtractAll => "extract_all",
        }
    }

    /// Status text written next to a successful row.
    pub fn success_status(self, created: bool) -> &'static str {
        match self {
            OperationKind::Insert => "Item Created",
            OperationKind::Update => "Item Updated",
            OperationKind::Upsert if created => "Item Created",
            OperationKind::Upsert => "Item Updated",
            OperationKind::Delete => "Item Deleted",
            OperationKind::Extract | OperationKind::ExtractAll => "Item Extracted",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "upsert" => Ok(OperationKind::Upsert),
            "delete" => Ok(OperationKind::Delete),
            "extract" => Ok(OperationKind::Extract),
            "extractall" => Ok(OperationKind::ExtractAll),
            _ => Err(format!(
                "unknown operation '{}' (expected insert, update, upsert, delete, extract or extract_all)",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Success { id: Option<String>, created: bool },
    Failure { message: String },
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub row: TableRow,
    pub outcome: RowOutcome,
}

/// Per-batch outcome, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub batch_index: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.len() - self.success_count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub operation: OperationKind,
    pub batches: usize,
    pub processed: usize,
    pub successes: usize,
    pub errors: usize,
    pub output_path: Option<PathBuf>,
    pub success_path: Option<PathBuf>,
    pub error_path: Option<PathBuf>,
}
