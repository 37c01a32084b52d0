//! Character-encoding resolution and streaming transcoding.
//!
//! Files on disk may be in any WHATWG-supported charset. Everything inside the
//! pipeline is UTF-8: [`DecodingReader`] turns file bytes into UTF-8 for the CSV
//! parser and [`EncodingWriter`] turns the CSV writer's UTF-8 back into the
//! sink's charset. Neither adapter ever substitutes replacement characters.

use crate::utils::error::{LoaderError, Result};
use encoding_rs::{Decoder, DecoderResult, Encoder, EncoderResult, Encoding};
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

const INPUT_BUFFER_SIZE: usize = 8 * 1024;
const OUTPUT_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding(&'static Encoding);

impl TextEncoding {
    pub fn utf8() -> Self {
        TextEncoding(encoding_rs::UTF_8)
    }

    pub fn for_label(label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            LoaderError::UnsupportedEncoding {
                label: label.to_string(),
            }
        })?;

        // "replacement" 只會產生 U+FFFD，視同不支援
        if encoding == encoding_rs::REPLACEMENT {
            return Err(LoaderError::UnsupportedEncoding {
                label: label.to_string(),
            });
        }

        Ok(TextEncoding(encoding))
    }

    /// Resolves the effective charset for one direction of a run.
    ///
    /// The label is always validated, even when `force_utf8` wins, so a typo in
    /// the configuration never goes unnoticed.
    pub fn resolve(file_encoding: &str, force_utf8: bool) -> Result<Self> {
        let declared = Self::for_label(file_encoding)?;
        Ok(if force_utf8 { Self::utf8() } else { declared })
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn is_utf8(&self) -> bool {
        self.0 == encoding_rs::UTF_8
    }

    /// UTF-16 variants decode fine but encoding_rs cannot produce them.
    pub fn can_write(&self) -> bool {
        self.0.output_encoding() == self.0
    }

    pub fn can_encode(&self, text: &str) -> bool {
        if self.is_utf8() || (text.is_ascii() && self.0.is_ascii_compatible()) {
            return true;
        }
        let (_, _, had_unmappables) = self.0.encode(text);
        !had_unmappables
    }

    pub fn decoding_reader<R: Read>(self, inner: R) -> DecodingReader<R> {
        DecodingReader::new(self.0, inner)
    }

    pub fn encoding_writer<W: Write>(self, inner: W) -> EncodingWriter<W> {
        EncodingWriter::new(self.0, inner)
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextEncoding({})", self.name())
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload carried inside `io::Error` by the transcoding adapters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("bytes at offset {offset} are not valid {encoding}")]
    Malformed { encoding: &'static str, offset: u64 },

    #[error("character {ch:?} cannot be represented in {encoding}")]
    Unmappable { encoding: &'static str, ch: char },

    #[error("writer received invalid UTF-8")]
    InvalidUtf8,

    #[error("output ended inside a UTF-8 sequence")]
    Truncated,
}

impl TranscodeError {
    pub fn from_io(err: &io::Error) -> Option<&TranscodeError> {
        err.get_ref()?.downcast_ref::<TranscodeError>()
    }

    fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

pub struct DecodingReader<R> {
    inner: R,
    encoding: &'static Encoding,
    decoder: Decoder,
    input: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    output: Box<[u8]>,
    out_pos: usize,
    out_len: usize,
    consumed: u64,
    eof: bool,
    finished: bool,
    // 先交出錯誤前已解碼的內容，再回報錯誤
    pending_error: Option<TranscodeError>,
}

impl<R: Read> DecodingReader<R> {
    fn new(encoding: &'static Encoding, inner: R) -> Self {
        Self {
            inner,
            encoding,
            decoder: encoding.new_decoder_with_bom_removal(),
            input: vec![0; INPUT_BUFFER_SIZE].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            output: vec![0; OUTPUT_BUFFER_SIZE].into_boxed_slice(),
            out_pos: 0,
            out_len: 0,
            consumed: 0,
            eof: false,
            finished: false,
            pending_error: None,
        }
    }

    fn refill_input(&mut self) -> io::Result<()> {
        loop {
            match self.inner.read(&mut self.input) {
                Ok(n) => {
                    self.in_pos = 0;
                    self.in_len = n;
                    self.eof = n == 0;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn decode_chunk(&mut self) -> io::Result<()> {
        if self.in_pos == self.in_len && !self.eof {
            self.refill_input()?;
        }

        let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
            &self.input[self.in_pos..self.in_len],
            &mut self.output,
            self.eof,
        );
        self.in_pos += read;
        self.consumed += read as u64;
        self.out_pos = 0;
        self.out_len = written;

        match result {
            DecoderResult::InputEmpty => {
                if self.eof {
                    self.finished = true;
                }
                Ok(())
            }
            DecoderResult::OutputFull => Ok(()),
            DecoderResult::Malformed(bad, extra) => {
                self.finished = true;
                self.pending_error = Some(TranscodeError::Malformed {
                    encoding: self.encoding.name(),
                    offset: self
                        .consumed
                        .saturating_sub(u64::from(bad) + u64::from(extra)),
                });
                Ok(())
            }
        }
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.out_pos == self.out_len {
            if let Some(err) = self.pending_error.take() {
                return Err(err.into_io());
            }
            if self.finished {
                return Ok(0);
            }
            self.decode_chunk()?;
        }

        let n = buf.len().min(self.out_len - self.out_pos);
        buf[..n].copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

pub struct EncodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    encoder: Encoder,
    // 上一次 write 結尾不完整的 UTF-8 位元組
    pending: Vec<u8>,
    output: Box<[u8]>,
}

impl<W: Write> EncodingWriter<W> {
    fn new(encoding: &'static Encoding, inner: W) -> Self {
        Self {
            inner,
            encoding,
            encoder: encoding.new_encoder(),
            pending: Vec::new(),
            output: vec![0; OUTPUT_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    fn encode_str(&mut self, mut text: &str, last: bool) -> io::Result<()> {
        loop {
            let (result, read, written) =
                self.encoder
                    .encode_from_utf8_without_replacement(text, &mut self.output, last);
            self.inner.write_all(&self.output[..written])?;
            text = &text[read..];

            match result {
                EncoderResult::InputEmpty => return Ok(()),
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(ch) => {
                    return Err(TranscodeError::Unmappable {
                        encoding: self.encoding.name(),
                        ch,
                    }
                    .into_io())
                }
            }
        }
    }

    /// Flushes the encoder state and hands back the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            return Err(TranscodeError::Truncated.into_io());
        }
        self.encode_str("", true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(buf);

        let valid_up_to = match std::str::from_utf8(&bytes) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(TranscodeError::InvalidUtf8.into_io()),
        };
        let text = std::str::from_utf8(&bytes[..valid_up_to])
            .map_err(|_| TranscodeError::InvalidUtf8.into_io())?;
        self.encode_str(text, false)?;

        self.pending = bytes[valid_up_to..].to_vec();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
