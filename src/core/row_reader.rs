use crate::core::encoding::{DecodingReader, TextEncoding, TranscodeError};
use crate::domain::model::TableRow;
use crate::utils::error::{LoaderError, Result};
use csv::StringRecord;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Streams [`TableRow`]s out of a delimited file in a declared encoding.
///
/// The header row names the columns. Blank lines anywhere in the file are
/// skipped; any other row must carry exactly one value per column.
pub struct RowReader {
    path: PathBuf,
    encoding: TextEncoding,
    reader: csv::Reader<DecodingReader<File>>,
    columns: Arc<[String]>,
    record: StringRecord,
    rows_read: usize,
}

impl RowReader {
    pub fn open(path: impl AsRef<Path>, encoding: TextEncoding, delimiter: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| LoaderError::io(&path, e))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(encoding.decoding_reader(file));

        let headers = reader
            .headers()
            .map_err(|e| map_csv_error(&path, e))?
            .clone();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(LoaderError::MissingHeader { path });
        }
        if let Some(index) = headers.iter().position(|h| h.trim().is_empty()) {
            return Err(LoaderError::EmptyColumnName {
                path,
                column: index + 1,
            });
        }
        let columns: Arc<[String]> = headers.iter().map(|h| h.trim().to_string()).collect();

        tracing::debug!(
            "Opened {} ({}) with {} columns",
            path.display(),
            encoding,
            columns.len()
        );

        Ok(Self {
            path,
            encoding,
            reader,
            columns,
            record: StringRecord::new(),
            rows_read: 0,
        })
    }

    /// Resolves `label` first, so an unknown charset fails before the file is touched.
    pub fn open_with_label(path: impl AsRef<Path>, label: &str, delimiter: u8) -> Result<Self> {
        let encoding = TextEncoding::for_label(label)?;
        Self::open(path, encoding, delimiter)
    }

    pub fn read_row(&mut self) -> Result<Option<TableRow>> {
        loop {
            let has_record = self
                .reader
                .read_record(&mut self.record)
                .map_err(|e| map_csv_error(&self.path, e))?;
            if !has_record {
                return Ok(None);
            }

            if self.record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            let values: Vec<String> = self.record.iter().map(str::to_string).collect();
            let found = values.len();
            let row = TableRow::new(Arc::clone(&self.columns), values).ok_or_else(|| {
                LoaderError::MalformedRow {
                    path: self.path.clone(),
                    line,
                    expected: self.columns.len(),
                    found,
                }
            })?;

            self.rows_read += 1;
            return Ok(Some(row));
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }
}

impl Iterator for RowReader {
    type Item = Result<TableRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

/// Splits csv errors into transcoding problems, plain IO failures and parse errors.
pub(crate) fn map_csv_error(path: &Path, err: csv::Error) -> LoaderError {
    if let csv::ErrorKind::Io(io_err) = err.kind() {
        if let Some(detail) = TranscodeError::from_io(io_err) {
            return LoaderError::EncodingError {
                path: path.to_path_buf(),
                detail: detail.to_string(),
            };
        }
        return LoaderError::io(path, std::io::Error::new(io_err.kind(), io_err.to_string()));
    }
    LoaderError::CsvError(err)
}
