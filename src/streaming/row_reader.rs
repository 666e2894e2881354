//! Streaming, backpressured CSV reader that yields flashcard rows.
//!
//! The file is tokenized by the `csv` crate on a blocking worker thread and
//! rows are handed to the async side through a bounded channel. When the
//! channel is full the tokenizer waits, so at most `capacity` parsed rows are
//! buffered ahead of the consumer regardless of file size. Dropping the
//! stream stops the tokenizer at its next row.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::import::row::{ColumnMap, ImportRow, RowOutcome, RowTemplate};
use crate::streaming::delimiter::{describe_byte, sniff_delimiter, Delimiter, SNIFF_SAMPLE_SIZE};

/// Rows buffered ahead of the consumer when no capacity is given.
const DEFAULT_CAPACITY: usize = 10;

/// Counters for one finished parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStats {
    /// Separator actually used (sniffed for `Delimiter::Auto`).
    pub delimiter: u8,
    /// Whether the header row named both a front and a back column.
    pub card_columns: bool,
    /// Non-blank data records read.
    pub records: u64,
    /// Records that produced a row.
    pub accepted: u64,
    /// Records dropped for a missing front or back.
    pub skipped: u64,
}

impl ParseStats {
    fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            card_columns: false,
            records: 0,
            accepted: 0,
            skipped: 0,
        }
    }
}

/// Configures one parse attempt over a file.
#[derive(Debug, Clone)]
pub struct RowReader {
    delimiter: Delimiter,
    template: RowTemplate,
    capacity: usize,
}

impl RowReader {
    pub fn new(delimiter: Delimiter, template: RowTemplate) -> Self {
        Self {
            delimiter,
            template,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Sets how many parsed rows may wait for the consumer.
    pub fn capacity(mut self, rows: usize) -> Self {
        self.capacity = rows.max(1);
        self
    }

    /// Starts parsing `path` from the beginning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self, path: &Path) -> RowStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let path = path.to_owned();

        let handle = tokio::task::spawn_blocking(move || {
            read_rows_blocking(&path, self.delimiter, &self.template, tx)
        });

        RowStream { rx, handle }
    }
}

/// Lazy, finite sequence of rows from one parse attempt. Not restartable.
pub struct RowStream {
    rx: mpsc::Receiver<ImportRow>,
    handle: JoinHandle<Result<ParseStats, AppError>>,
}

impl RowStream {
    /// Waits for the next accepted row. `None` once the reader has stopped,
    /// either at end of file or on a parse error reported by [`finish`].
    ///
    /// [`finish`]: RowStream::finish
    pub async fn next_row(&mut self) -> Option<ImportRow> {
        self.rx.recv().await
    }

    /// Waits for the reader to stop and returns its counters, or the parse
    /// error that ended the attempt.
    pub async fn finish(self) -> Result<ParseStats, AppError> {
        let RowStream { rx, handle } = self;
        // Unblocks the reader if rows are still queued
        drop(rx);
        handle
            .await
            .map_err(|e| AppError::Internal(format!("CSV reader task failed: {}", e)))?
    }
}

/// Blocking implementation of one parse attempt.
fn read_rows_blocking(
    path: &Path,
    delimiter: Delimiter,
    template: &RowTemplate,
    tx: mpsc::Sender<ImportRow>,
) -> Result<ParseStats, AppError> {
    let mut file = File::open(path)
        .map_err(|e| AppError::FileRead(format!("Failed to open import file: {}", e)))?;

    let separator = match delimiter.byte() {
        Some(b) => b,
        None => sniff_file(&mut file)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(separator)
        .from_reader(BufReader::new(file));

    let headers = reader.headers().map_err(map_csv_error)?.clone();
    let columns = ColumnMap::from_headers(&headers);

    let mut stats = ParseStats::new(separator);
    stats.card_columns = columns.has_card_columns();

    tracing::debug!(
        attempt = %delimiter,
        delimiter = %describe_byte(separator),
        columns = headers.len(),
        card_columns = stats.card_columns,
        "Parsing CSV"
    );

    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::debug!(records = stats.records, "CSV parse error: {}", e);
                return Err(map_csv_error(e));
            }
        }

        match columns.resolve(&record) {
            RowOutcome::Blank => continue,
            RowOutcome::Skipped => {
                stats.records += 1;
                stats.skipped += 1;
                #[cfg(debug_assertions)]
                tracing::trace!(
                    line = ?record.position().map(|p| p.line()),
                    "Skipping row without front/back"
                );
            }
            RowOutcome::Card { front, back, known } => {
                stats.records += 1;
                stats.accepted += 1;
                if tx.blocking_send(template.build(front, back, known)).is_err() {
                    tracing::debug!(
                        accepted = stats.accepted,
                        "Row consumer went away, stopping CSV reader"
                    );
                    return Ok(stats);
                }
            }
        }
    }

    Ok(stats)
}

/// Reads the head of the file, sniffs the delimiter and rewinds.
fn sniff_file(file: &mut File) -> Result<u8, AppError> {
    let mut sample = Vec::with_capacity(SNIFF_SAMPLE_SIZE);
    file.by_ref()
        .take(SNIFF_SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)
        .map_err(|e| AppError::FileRead(format!("Failed to read import file: {}", e)))?;

    file.seek(SeekFrom::Start(0))
        .map_err(|e| AppError::FileRead(format!("Failed to rewind import file: {}", e)))?;

    Ok(sniff_delimiter(&sample))
}

fn map_csv_error(e: csv::Error) -> AppError {
    match e.kind() {
        csv::ErrorKind::Utf8 { .. } => AppError::NotUtf8,
        csv::ErrorKind::Io(io) => AppError::FileRead(format!("Failed to read import file: {}", io)),
        _ => AppError::CsvInvalid(e.to_string()),
    }
}
