pub mod batch;
pub mod batch_loader;
pub mod encoding;
pub mod engine;
pub mod extractor;
pub mod field_mapper;
pub mod row_reader;
pub mod row_writer;

pub use crate::domain::model::{OperationKind, RunSummary, TableRow};
pub use crate::domain::ports::RemoteClient;
pub use crate::utils::error::Result;
