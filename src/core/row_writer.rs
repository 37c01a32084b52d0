use crate::core::encoding::{EncodingWriter, TextEncoding, TranscodeError};
use crate::core::row_reader::map_csv_error;
use crate::domain::model::TableRow;
use crate::utils::error::{LoaderError, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const ID_COLUMN: &str = "ID";
pub const STATUS_COLUMN: &str = "STATUS";
pub const ERROR_COLUMN: &str = "ERROR";

/// Streams rows into one output file in a declared encoding.
///
/// The header goes out together with the first row, so a sink that never
/// receives a row stays empty.
pub struct RowWriter {
    path: PathBuf,
    encoding: TextEncoding,
    writer: csv::Writer<EncodingWriter<File>>,
    header: Vec<String>,
    header_written: bool,
    rows_written: usize,
}

impl RowWriter {
    pub fn create(
        path: impl AsRef<Path>,
        encoding: TextEncoding,
        delimiter: u8,
        header: Vec<String>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !encoding.can_write() {
            return Err(LoaderError::EncodingError {
                path,
                detail: format!("{} cannot be used for output files", encoding),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LoaderError::io(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| LoaderError::io(&path, e))?;

        let writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(encoding.encoding_writer(file));

        Ok(Self {
            path,
            encoding,
            writer,
            header,
            header_written: false,
            rows_written: 0,
        })
    }

    /// `ID`, the source columns, `STATUS`.
    pub fn success_sink(
        path: impl AsRef<Path>,
        encoding: TextEncoding,
        delimiter: u8,
        columns: &[String],
    ) -> Result<Self> {
        let mut header = Vec::with_capacity(columns.len() + 2);
        header.push(ID_COLUMN.to_string());
        header.extend(columns.iter().cloned());
        header.push(STATUS_COLUMN.to_string());
        Self::create(path, encoding, delimiter, header)
    }

    /// The source columns, `ERROR`.
    pub fn error_sink(
        path: impl AsRef<Path>,
        encoding: TextEncoding,
        delimiter: u8,
        columns: &[String],
    ) -> Result<Self> {
        let mut header = columns.to_vec();
        header.push(ERROR_COLUMN.to_string());
        Self::create(path, encoding, delimiter, header)
    }

    pub fn write_row(&mut self, row: &TableRow) -> Result<()> {
        self.write_fields(row.values().iter().map(String::as_str))
    }

    pub fn write_success(&mut self, row: &TableRow, id: &str, status: &str) -> Result<()> {
        self.write_fields(
            std::iter::once(id)
                .chain(row.values().iter().map(String::as_str))
                .chain(std::iter::once(status)),
        )
    }

    pub fn write_error(&mut self, row: &TableRow, message: &str) -> Result<()> {
        self.write_fields(
            row.values()
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(message)),
        )
    }

    fn write_fields<'a>(&mut self, fields: impl Iterator<Item = &'a str>) -> Result<()> {
        let fields: Vec<&str> = fields.collect();

        if !self.header_written {
            let header: Vec<&str> = self.header.iter().map(String::as_str).collect();
            self.ensure_encodable(&header, 0)?;
            self.writer
                .write_record(&header)
                .map_err(|e| map_csv_error(&self.path, e))?;
            self.header_written = true;
        }

        self.ensure_encodable(&fields, self.rows_written + 1)?;
        self.writer
            .write_record(&fields)
            .map_err(|e| map_csv_error(&self.path, e))?;
        self.rows_written += 1;
        Ok(())
    }

    // 逐欄檢查，錯誤訊息才能指出是哪一列哪一欄
    fn ensure_encodable(&self, fields: &[&str], row_number: usize) -> Result<()> {
        for (idx, value) in fields.iter().enumerate() {
            if self.encoding.can_encode(value) {
                continue;
            }
            let column = self.header.get(idx).map(String::as_str).unwrap_or("?");
            let location = if row_number == 0 {
                "header".to_string()
            } else {
                format!("row {}", row_number)
            };
            return Err(LoaderError::EncodingError {
                path: self.path.clone(),
                detail: format!(
                    "value of column '{}' in {} cannot be represented in {}",
                    column, location, self.encoding
                ),
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flushes everything and closes the file.
    pub fn finish(self) -> Result<usize> {
        let path = self.path;
        let encoder = self
            .writer
            .into_inner()
            .map_err(|e| map_io_error(&path, e.into_error()))?;
        encoder.finish().map_err(|e| map_io_error(&path, e))?;

        tracing::debug!("Wrote {} rows to {}", self.rows_written, path.display());
        Ok(self.rows_written)
    }
}

fn map_io_error(path: &Path, err: io::Error) -> LoaderError {
    match TranscodeError::from_io(&err) {
        Some(detail) => LoaderError::EncodingError {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        },
        None => LoaderError::io(path, err),
    }
}
