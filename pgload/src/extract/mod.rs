//! CSV extraction with encoding and delimiter auto-detection.
//!
//! [`Extractor::open`] reads the header and returns an [`Extraction`], a lazy
//! iterator over data rows. Rows are read one record at a time; only
//! non-UTF-8 sources are decoded up front.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use csv::{ErrorKind, ReaderBuilder, StringRecord};

use crate::config::{SourceConfig, SourceEncoding};
use crate::error::{ExtractError, ExtractResult};

/// Bytes inspected for encoding and delimiter detection.
const SAMPLE_SIZE: usize = 64 * 1024;

/// Candidate delimiters, in order of preference on ties.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const BOM: char = '\u{feff}';

/// One extracted record: raw strings keyed by header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    index: usize,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    pub fn new(index: usize, headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { index, headers, values }
    }

    /// 1-based data row index (the header is not counted).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw value of a column, `None` if the header has no such column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Opens CSV sources.
pub struct Extractor;

impl Extractor {
    /// Open the source and read its header.
    pub fn open(config: &SourceConfig) -> ExtractResult<Extraction> {
        let path = config.path.as_path();
        let mut file = File::open(path).map_err(|source| ExtractError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let sample = read_sample(&mut file, path)?;
        if sample.is_empty() {
            return Err(ExtractError::Empty(path.to_path_buf()));
        }

        let encoding = match config.encoding {
            SourceEncoding::Auto => detect_encoding(&sample),
            explicit => explicit,
        };

        let (input, head): (Box<dyn Read + Send>, String) = match encoding {
            SourceEncoding::Utf8 | SourceEncoding::Auto => {
                let head = String::from_utf8_lossy(&sample).into_owned();
                (Box::new(Cursor::new(sample).chain(file)), head)
            }
            other => {
                let mut bytes = sample;
                file.read_to_end(&mut bytes).map_err(|e| ExtractError::Io {
                    row: 0,
                    message: e.to_string(),
                })?;
                let text = decode(&bytes, other)?;
                let head: String = text.chars().take(SAMPLE_SIZE).collect();
                (Box::new(Cursor::new(text.into_bytes())), head)
            }
        };

        let delimiter = config.delimiter.unwrap_or_else(|| detect_delimiter(&head));

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers: Vec<String> = match reader.headers() {
            Ok(record) => record.iter().map(str::to_string).collect(),
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::Io(io) => ExtractError::Io { row: 0, message: io.to_string() },
                    _ => ExtractError::Header(e.to_string()),
                })
            }
        };

        if headers.is_empty() || headers.iter().all(|h| h.trim_start_matches(BOM).is_empty()) {
            return Err(ExtractError::Empty(path.to_path_buf()));
        }

        let mut headers = headers;
        if let Some(first) = headers.first_mut() {
            if let Some(stripped) = first.strip_prefix(BOM) {
                *first = stripped.to_string();
            }
        }

        tracing::debug!(
            "Opened {} (encoding {}, delimiter '{}', {} columns)",
            path.display(),
            encoding,
            delimiter_label(delimiter),
            headers.len()
        );

        Ok(Extraction {
            reader,
            record: StringRecord::new(),
            headers: headers.into(),
            encoding,
            delimiter,
            row: 0,
            finished: false,
        })
    }
}

/// Lazy sequence of rows from an opened source.
///
/// Yields per-row errors (`ColumnCount`, `Malformed`) and keeps going; a fatal
/// error is yielded once and ends the iteration.
pub struct Extraction {
    reader: csv::Reader<Box<dyn Read + Send>>,
    record: StringRecord,
    headers: Arc<[String]>,
    encoding: SourceEncoding,
    delimiter: u8,
    row: usize,
    finished: bool,
}

impl Extraction {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Encoding used to read the source (never `Auto`).
    pub fn encoding(&self) -> SourceEncoding {
        self.encoding
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl Iterator for Extraction {
    type Item = ExtractResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.finished = true;
                None
            }
            Ok(true) => {
                self.row += 1;
                let expected = self.headers.len();
                let found = self.record.len();
                if found != expected {
                    return Some(Err(ExtractError::ColumnCount {
                        row: self.row,
                        expected,
                        found,
                    }));
                }
                let values = self.record.iter().map(str::to_string).collect();
                Some(Ok(Row::new(self.row, Arc::clone(&self.headers), values)))
            }
            Err(e) => {
                self.row += 1;
                match e.kind() {
                    ErrorKind::Io(io) => {
                        self.finished = true;
                        Some(Err(ExtractError::Io { row: self.row, message: io.to_string() }))
                    }
                    ErrorKind::Utf8 { err, .. } => Some(Err(ExtractError::Malformed {
                        row: self.row,
                        message: format!("invalid UTF-8 in field {}", err.field() + 1),
                    })),
                    _ => Some(Err(ExtractError::Malformed { row: self.row, message: e.to_string() })),
                }
            }
        }
    }
}

fn read_sample(file: &mut File, path: &Path) -> ExtractResult<Vec<u8>> {
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    file.by_ref()
        .take(SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)
        .map_err(|e| ExtractError::Io {
            row: 0,
            message: format!("{}: {}", path.display(), e),
        })?;
    Ok(sample)
}

/// Guess the encoding of a byte sample.
///
/// Valid UTF-8 (a multi-byte sequence cut at the end of the sample included)
/// wins; otherwise chardet picks a single-byte encoding, Windows-1252 unless
/// it is confident about ISO-8859-1.
pub fn detect_encoding(bytes: &[u8]) -> SourceEncoding {
    match std::str::from_utf8(bytes) {
        Ok(_) => return SourceEncoding::Utf8,
        Err(e) if e.error_len().is_none() => return SourceEncoding::Utf8,
        Err(_) => {}
    }

    let charset = chardet::detect(bytes).0;
    match charset.to_lowercase().as_str() {
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => SourceEncoding::Latin1,
        _ => SourceEncoding::Windows1252,
    }
}

/// Decode a whole single-byte source to UTF-8.
///
/// ISO-8859-1 maps every byte to the code point of the same value.
pub fn decode(bytes: &[u8], encoding: SourceEncoding) -> ExtractResult<String> {
    let codec = match encoding {
        SourceEncoding::Latin1 => return Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        SourceEncoding::Utf8 | SourceEncoding::Auto => encoding_rs::UTF_8,
        SourceEncoding::Windows1252 => encoding_rs::WINDOWS_1252,
    };

    let (text, _, had_errors) = codec.decode(bytes);
    if had_errors {
        return Err(ExtractError::Encoding { encoding: encoding.to_string() });
    }
    Ok(text.into_owned())
}

/// Pick the delimiter that occurs most often in the first line.
///
/// Falls back to `,` when none of the candidates appears.
pub fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.trim_start_matches(BOM).lines().next().unwrap_or("");

    let mut best = b',';
    let mut best_count = 0;
    for &sep in &DELIMITERS {
        let count = first_line.bytes().filter(|b| *b == sep).count();
        if count > best_count {
            best_count = count;
            best = sep;
        }
    }
    best
}

/// Printable form of a delimiter byte.
pub fn delimiter_label(d: u8) -> String {
    match d {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
