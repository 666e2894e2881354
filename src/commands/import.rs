//! CSV import orchestration.
//!
//! A file is parsed once per delimiter candidate (auto, semicolon, comma,
//! tab) until an attempt persists at least one row. Within an attempt the
//! reader and the batch writer alternate: the reader is paused while a batch
//! is being written, so at most one insert request is in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::CardRecord;
use crate::config::ImportSettings;
use crate::error::AppError;
use crate::import::progress::{ImportPhase, ImportProgress, ProgressObserver};
use crate::import::row::{ImportRow, RowTemplate};
use crate::import::writer::{BatchWriter, RowSink};
use crate::state::AppState;
use crate::streaming::delimiter::{describe_byte, Delimiter};
use crate::streaming::row_reader::{ParseStats, RowReader, RowStream};

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request to import one CSV file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Path to the CSV file to import.
    pub csv_path: PathBuf,
    /// Destination folder.
    pub folder_id: Option<String>,
    /// Owner of the imported cards.
    pub user_id: Option<String>,
}

/// Summary of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Rows persisted.
    pub imported: u64,
    /// Rows dropped for a missing front or back in the successful attempt.
    pub skipped: u64,
    /// Separator of the successful attempt, e.g. `";"`.
    pub delimiter: String,
    /// Labels of every attempt made, in order.
    pub tried: Vec<String>,
}

impl ImportReport {
    /// Final message shown to the user.
    pub fn summary(&self) -> String {
        format!(
            "Imported {} flashcards into the selected folder.",
            self.imported
        )
    }
}

/// Result of the `import_csv` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub report: ImportReport,
    /// Cards in the destination folder after the import, or `None` if the
    /// refetch failed.
    pub cards: Option<Vec<CardRecord>>,
}

/// What one delimiter candidate would produce, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPreview {
    pub attempt: String,
    /// Separator actually used; differs from `attempt` only for auto.
    pub delimiter: Option<String>,
    pub card_columns: bool,
    pub accepted: u64,
    pub skipped: u64,
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// CsvImporter
// ─────────────────────────────────────────────────────────────────────────────

/// Why a single parse attempt stopped early.
#[derive(Debug)]
enum AttemptFailure {
    /// The file could not be tokenized with this candidate.
    Parse(AppError),
    /// Persistence failed or the import was cancelled.
    Terminal(AppError),
}

enum Step {
    Next(Option<ImportRow>),
    Cancelled,
}

/// Runs imports against a row sink.
pub struct CsvImporter<S: RowSink> {
    sink: Arc<S>,
    settings: ImportSettings,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl<S: RowSink + 'static> CsvImporter<S> {
    pub fn new(sink: Arc<S>, settings: ImportSettings, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            sink,
            settings,
            observer,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an externally controlled cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, phase: ImportPhase, processed_count: u64, message: Option<String>) {
        self.observer.on_progress(&ImportProgress {
            running: matches!(phase, ImportPhase::Starting | ImportPhase::Importing),
            processed_count,
            phase,
            message,
        });
    }

    /// Imports the file, reporting progress after every persisted batch and
    /// once more when the import terminates.
    ///
    /// # Errors
    ///
    /// - `AppError::MissingFolder` / `AppError::NotAuthenticated` - before any I/O
    /// - `AppError::NoRowsRecognized` - no candidate produced a row
    /// - `AppError::ImportAborted` - a terminal failure after the import
    ///   started, with the number of rows persisted before it
    pub async fn run(&self, req: ImportRequest) -> Result<ImportReport, AppError> {
        let result = match validate(&req) {
            Ok(template) => self.import_file(&req.csv_path, template).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                info!(
                    "[CSV-IMPORT] Imported {} rows with delimiter {} (skipped {})",
                    report.imported, report.delimiter, report.skipped
                );
                self.emit(ImportPhase::Completed, report.imported, Some(report.summary()));
            }
            Err(e) => {
                let imported = match e {
                    AppError::ImportAborted { imported, .. } => *imported,
                    _ => 0,
                };
                warn!("[CSV-IMPORT] Import failed after {} rows: {}", imported, e);
                self.emit(
                    ImportPhase::Failed,
                    imported,
                    Some(e.to_presentation().message),
                );
            }
        }

        result
    }

    async fn import_file(
        &self,
        path: &Path,
        template: RowTemplate,
    ) -> Result<ImportReport, AppError> {
        self.emit(
            ImportPhase::Starting,
            0,
            Some("Reading CSV file...".to_string()),
        );

        let mut writer = BatchWriter::new(self.sink.clone(), self.observer.clone())
            .batch_size(self.settings.batch_size)
            .inter_batch_delay(self.settings.inter_batch_delay)
            .retry_policy(self.settings.retry.clone())
            .request_timeout(self.settings.request_timeout);

        let mut tried = Vec::with_capacity(Delimiter::FALLBACK_ORDER.len());
        let mut last_parse_error = None;

        for delimiter in Delimiter::FALLBACK_ORDER {
            tried.push(delimiter.label());
            let before = writer.persisted();

            info!("[CSV-IMPORT] Parsing with delimiter {}", delimiter);

            match self.run_attempt(path, delimiter, &template, &mut writer).await {
                Ok(stats) => {
                    if writer.persisted() > before {
                        return Ok(ImportReport {
                            imported: writer.persisted(),
                            skipped: stats.skipped,
                            delimiter: describe_byte(stats.delimiter),
                            tried,
                        });
                    }
                    info!(
                        "[CSV-IMPORT] Delimiter {} produced no rows (card columns: {}, skipped: {})",
                        delimiter, stats.card_columns, stats.skipped
                    );
                }
                Err(AttemptFailure::Parse(e)) if writer.persisted() == before => {
                    warn!("[CSV-IMPORT] Delimiter {} failed to parse: {}", delimiter, e);
                    writer.discard_pending();
                    last_parse_error = Some(Box::new(e));
                }
                // Rows from this attempt are already persisted
                Err(AttemptFailure::Parse(e)) | Err(AttemptFailure::Terminal(e)) => {
                    return Err(AppError::aborted(writer.persisted(), e));
                }
            }
        }

        Err(AppError::NoRowsRecognized {
            tried,
            last_parse_error,
        })
    }

    /// One parse attempt: streams rows into the writer and flushes the tail.
    async fn run_attempt(
        &self,
        path: &Path,
        delimiter: Delimiter,
        template: &RowTemplate,
        writer: &mut BatchWriter<Arc<S>>,
    ) -> Result<ParseStats, AttemptFailure> {
        let mut stream = RowReader::new(delimiter, template.clone())
            .capacity(self.settings.batch_size)
            .open(path);

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                row = stream.next_row() => Step::Next(row),
            };

            let row = match step {
                Step::Next(Some(row)) => row,
                Step::Next(None) => break,
                Step::Cancelled => return Err(stop(stream, AppError::Cancelled).await),
            };

            let pushed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AppError::Cancelled),
                r = writer.push(row) => r,
            };
            if let Err(e) = pushed {
                return Err(stop(stream, e).await);
            }
        }

        let stats = stream.finish().await.map_err(AttemptFailure::Parse)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            r = writer.flush() => r,
        }
        .map_err(AttemptFailure::Terminal)?;

        Ok(stats)
    }
}

/// Stops the reader after a terminal failure.
async fn stop(stream: RowStream, error: AppError) -> AttemptFailure {
    // The reader's own outcome is irrelevant once the import is aborted
    let _ = stream.finish().await;
    AttemptFailure::Terminal(error)
}

/// Checks the destination and owner without touching the file or network.
fn validate(req: &ImportRequest) -> Result<RowTemplate, AppError> {
    let folder_id = non_blank(&req.folder_id).ok_or(AppError::MissingFolder)?;
    let user_id = non_blank(&req.user_id).ok_or(AppError::NotAuthenticated)?;
    Ok(RowTemplate::new(user_id, folder_id))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Parses the file with every delimiter candidate and reports what each
/// would import. Makes no network calls.
pub async fn preview_csv(path: &Path) -> Vec<AttemptPreview> {
    let template = RowTemplate::new("", "");
    let mut previews = Vec::with_capacity(Delimiter::FALLBACK_ORDER.len());

    for delimiter in Delimiter::FALLBACK_ORDER {
        let mut stream = RowReader::new(delimiter, template.clone()).open(path);
        while stream.next_row().await.is_some() {}

        previews.push(match stream.finish().await {
            Ok(stats) => AttemptPreview {
                attempt: delimiter.label(),
                delimiter: Some(describe_byte(stats.delimiter)),
                card_columns: stats.card_columns,
                accepted: stats.accepted,
                skipped: stats.skipped,
                error: None,
            },
            Err(e) => AttemptPreview {
                attempt: delimiter.label(),
                delimiter: None,
                card_columns: false,
                accepted: 0,
                skipped: 0,
                error: Some(e.to_presentation().message),
            },
        });
    }

    previews
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Imports a CSV file into the selected folder and refetches its cards.
///
/// This command:
/// 1. Checks that a folder is selected and a user is signed in
/// 2. Parses the file, trying each delimiter candidate in turn
/// 3. Persists rows in batches with retry and payload splitting
/// 4. Refetches the folder's cards on success
pub async fn import_csv(
    state: &AppState,
    csv_path: PathBuf,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
) -> Result<ImportOutcome, AppError> {
    let folder_id = state.get_import_folder().await;
    let user_id = state.get_user_id().await;

    let importer = CsvImporter::new(state.client.clone(), state.settings.clone(), observer)
        .with_cancel(cancel);

    let report = importer
        .run(ImportRequest {
            csv_path,
            folder_id: folder_id.clone(),
            user_id,
        })
        .await?;

    // Folder presence was checked by the importer
    let cards = match folder_id {
        Some(folder_id) => match state.client.fetch_cards(&folder_id).await {
            Ok(cards) => Some(cards),
            Err(e) => {
                warn!("[CSV-IMPORT] Refetch after import failed: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(ImportOutcome { report, cards })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::writer::RetryPolicy;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io::Write;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    // ─────────────────────────────────────────────────────────────────────────
    // Fake Implementations for Testing
    // ─────────────────────────────────────────────────────────────────────────

    /// In-memory sink with an optional script of failures.
    #[derive(Default)]
    struct FakeSink {
        stored: Mutex<Vec<ImportRow>>,
        calls: Mutex<Vec<usize>>,
        script: Mutex<VecDeque<Result<(), AppError>>>,
        /// Cancels this token on the given call number (1-based).
        cancel_on_call: Option<(usize, CancellationToken)>,
    }

    impl FakeSink {
        fn failing_with(script: Vec<Result<(), AppError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn stored(&self) -> Vec<ImportRow> {
            self.stored.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RowSink for FakeSink {
        fn insert_rows<'a>(
            &'a self,
            rows: &'a [ImportRow],
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    calls.push(rows.len());
                    calls.len()
                };
                if let Some((n, token)) = &self.cancel_on_call {
                    if *n == call {
                        token.cancel();
                    }
                }

                let scripted = self.script.lock().unwrap().pop_front();
                match scripted {
                    Some(Err(e)) => Err(e),
                    _ => {
                        self.stored.lock().unwrap().extend_from_slice(rows);
                        Ok(())
                    }
                }
            })
        }
    }

    /// Collects every progress update.
    fn recorder() -> (Arc<Mutex<Vec<ImportProgress>>>, Arc<dyn ProgressObserver>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let seen = seen.clone();
            move |p: &ImportProgress| seen.lock().unwrap().push(p.clone())
        };
        (seen, Arc::new(observer))
    }

    fn fast_settings() -> ImportSettings {
        ImportSettings {
            retry: RetryPolicy {
                max_retries: 6,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::ZERO,
            },
            inter_batch_delay: Duration::ZERO,
            ..ImportSettings::default()
        }
    }

    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes()).expect("Failed to write temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn request(path: &Path) -> ImportRequest {
        ImportRequest {
            csv_path: path.to_path_buf(),
            folder_id: Some("folder-1".to_string()),
            user_id: Some("user-1".to_string()),
        }
    }

    fn importer(sink: Arc<FakeSink>) -> (CsvImporter<FakeSink>, Arc<Mutex<Vec<ImportProgress>>>) {
        let (seen, observer) = recorder();
        (CsvImporter::new(sink, fast_settings(), observer), seen)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // End-to-end scenarios
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_polish_semicolon_file() {
        let file = create_temp_csv(
            "Przód;Tył;known\nPies;Dog;false\nKot;Cat;true\n;Empty;false\nMysz;Mouse;true\n",
        );
        let sink = Arc::new(FakeSink::default());
        let (importer, seen) = importer(sink.clone());

        let report = importer.run(request(file.path())).await.expect("import should succeed");

        assert_eq!(report.imported, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delimiter, "\";\"");
        assert_eq!(report.tried, vec!["auto"]);
        assert!(report.summary().contains('3'));

        let stored = sink.stored();
        let faces: Vec<(&str, &str, bool)> = stored
            .iter()
            .map(|r| (r.front.as_str(), r.back.as_str(), r.known))
            .collect();
        assert_eq!(
            faces,
            vec![("Pies", "Dog", false), ("Kot", "Cat", true), ("Mysz", "Mouse", true)]
        );
        assert!(stored.iter().all(|r| r.folder_id == "folder-1" && r.user_id == "user-1"));
        assert_eq!(sink.calls(), vec![3]);

        let seen = seen.lock().unwrap();
        let last = seen.last().expect("final update");
        assert!(!last.running);
        assert_eq!(last.phase, ImportPhase::Completed);
        assert_eq!(last.processed_count, 3);
        assert!(seen
            .iter()
            .any(|p| p.phase == ImportPhase::Importing && p.running && p.processed_count == 3));
    }

    #[tokio::test]
    async fn test_falls_back_to_semicolon_when_auto_finds_no_columns() {
        // Comma and semicolon tie when sniffing, so auto picks comma
        let file = create_temp_csv("Przód;Tył;note,a,b\nkot;cat;x,y,z\npies;dog;q,w,e\n");
        let sink = Arc::new(FakeSink::default());
        let (importer, _) = importer(sink.clone());

        let report = importer.run(request(file.path())).await.unwrap();

        assert_eq!(report.tried, vec!["auto", "\";\""]);
        assert_eq!(report.delimiter, "\";\"");
        assert_eq!(report.imported, 2);
        assert_eq!(sink.stored()[0].front, "kot");
    }

    #[tokio::test]
    async fn test_tab_file_uses_every_candidate() {
        let file = create_temp_csv("front\tback\ncat\tkot\n");
        let sink = Arc::new(FakeSink::default());
        let (importer, _) = importer(sink.clone());

        let report = importer.run(request(file.path())).await.unwrap();

        // Auto already sniffs the tab
        assert_eq!(report.tried, vec!["auto"]);
        assert_eq!(report.delimiter, "\"\\t\"");
        assert_eq!(report.imported, 1);
    }

    #[tokio::test]
    async fn test_batches_are_flushed_in_order() {
        let mut content = String::from("front,back\n");
        for i in 0..25 {
            content.push_str(&format!("f{},b{}\n", i, i));
        }
        let file = create_temp_csv(&content);
        let sink = Arc::new(FakeSink::default());
        let (importer, seen) = importer(sink.clone());

        let report = importer.run(request(file.path())).await.unwrap();

        assert_eq!(report.imported, 25);
        assert_eq!(sink.calls(), vec![10, 10, 5]);
        let fronts: Vec<String> = sink.stored().into_iter().map(|r| r.front).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("f{}", i)).collect();
        assert_eq!(fronts, expected);

        let counts: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.phase == ImportPhase::Importing)
            .map(|p| p.processed_count)
            .collect();
        assert_eq!(counts, vec![10, 20, 25]);
    }

    #[tokio::test]
    async fn test_oversized_batch_is_split() {
        let mut content = String::from("front,back\n");
        for i in 0..10 {
            content.push_str(&format!("f{},b{}\n", i, i));
        }
        let file = create_temp_csv(&content);
        let sink = Arc::new(FakeSink::failing_with(vec![Err(AppError::Backend {
            status: 413,
            message: "Payload Too Large".into(),
        })]));
        let (importer, _) = importer(sink.clone());

        let report = importer.run(request(file.path())).await.unwrap();

        assert_eq!(report.imported, 10);
        assert_eq!(sink.calls(), vec![10, 5, 5]);
        assert_eq!(sink.stored().len(), 10);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failures
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_abort_after_split_counts_stored_half() {
        let mut content = String::from("front,back\n");
        for i in 0..10 {
            content.push_str(&format!("f{},b{}\n", i, i));
        }
        let file = create_temp_csv(&content);
        let sink = Arc::new(FakeSink::failing_with(vec![
            Err(AppError::PayloadTooLarge("too big".into())),
            Ok(()),
            Err(AppError::Backend {
                status: 400,
                message: "invalid input".into(),
            }),
        ]));
        let (importer, seen) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::ImportAborted { imported, source }) => {
                assert_eq!(imported, 5);
                assert!(matches!(*source, AppError::Backend { status: 400, .. }));
            }
            other => panic!("Expected ImportAborted, got {:?}", other),
        }
        assert_eq!(sink.calls(), vec![10, 5, 5]);
        assert_eq!(sink.stored().len(), 5);

        let seen = seen.lock().unwrap();
        let last = seen.last().expect("final update");
        assert_eq!(last.phase, ImportPhase::Failed);
        assert_eq!(last.processed_count, 5);
    }

    #[tokio::test]
    async fn test_missing_folder_fails_before_any_io() {
        let sink = Arc::new(FakeSink::default());
        let (importer, seen) = importer(sink.clone());

        let result = importer
            .run(ImportRequest {
                csv_path: PathBuf::from("/nonexistent/cards.csv"),
                folder_id: None,
                user_id: Some("user-1".into()),
            })
            .await;

        assert!(matches!(result, Err(AppError::MissingFolder)));
        assert!(sink.calls().is_empty());
        // Only the terminal update; no parse was started
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].phase, ImportPhase::Failed);
    }

    #[tokio::test]
    async fn test_blank_folder_counts_as_missing() {
        let sink = Arc::new(FakeSink::default());
        let (importer, _) = importer(sink);

        let result = importer
            .run(ImportRequest {
                csv_path: PathBuf::from("cards.csv"),
                folder_id: Some("  ".into()),
                user_id: Some("user-1".into()),
            })
            .await;

        assert!(matches!(result, Err(AppError::MissingFolder)));
    }

    #[tokio::test]
    async fn test_missing_user_is_not_authenticated() {
        let sink = Arc::new(FakeSink::default());
        let (importer, _) = importer(sink);

        let result = importer
            .run(ImportRequest {
                csv_path: PathBuf::from("cards.csv"),
                folder_id: Some("folder-1".into()),
                user_id: None,
            })
            .await;

        assert!(matches!(result, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_no_recognized_rows_lists_all_candidates() {
        let file = create_temp_csv("question,answer\ncat,kot\n");
        let sink = Arc::new(FakeSink::default());
        let (importer, seen) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::NoRowsRecognized { tried, .. }) => {
                assert_eq!(tried, vec!["auto", "\";\"", "\",\"", "\"\\t\""]);
            }
            other => panic!("Expected NoRowsRecognized, got {:?}", other),
        }
        assert!(sink.calls().is_empty());

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.phase, ImportPhase::Failed);
        assert!(!last.running);
        assert!(last.message.as_deref().unwrap_or("").contains("auto"));
    }

    #[tokio::test]
    async fn test_parse_error_before_persisting_tries_next_candidate() {
        // Invalid UTF-8 on the first data row fails every attempt before any flush
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"front,back\n\xff,bad\n").unwrap();
        file.flush().unwrap();
        let sink = Arc::new(FakeSink::default());
        let (importer, seen) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::NoRowsRecognized {
                tried,
                last_parse_error,
            }) => {
                assert_eq!(tried.len(), 4);
                assert!(matches!(last_parse_error.as_deref(), Some(AppError::NotUtf8)));
            }
            other => panic!("Expected NoRowsRecognized, got {:?}", other),
        }
        assert!(sink.calls().is_empty());

        let seen = seen.lock().unwrap();
        let message = seen.last().and_then(|p| p.message.clone()).unwrap_or_default();
        assert!(message.contains("UTF-8"), "got {:?}", message);
    }

    #[tokio::test]
    async fn test_parse_error_after_persisting_is_terminal() {
        let mut content = b"front,back\n".to_vec();
        for i in 0..12 {
            content.extend_from_slice(format!("f{},b{}\n", i, i).as_bytes());
        }
        content.extend_from_slice(b"\xff,bad\n");
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let sink = Arc::new(FakeSink::default());
        let (importer, _) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::ImportAborted { imported, source }) => {
                assert_eq!(imported, 10);
                assert!(matches!(*source, AppError::NotUtf8));
            }
            other => panic!("Expected ImportAborted, got {:?}", other),
        }
        // The two rows buffered after the first batch are not written
        assert_eq!(sink.calls(), vec![10]);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_with_count() {
        let mut content = String::from("front,back\n");
        for i in 0..30 {
            content.push_str(&format!("f{},b{}\n", i, i));
        }
        let file = create_temp_csv(&content);
        let sink = Arc::new(FakeSink::failing_with(vec![
            Ok(()),
            Err(AppError::Backend {
                status: 400,
                message: "invalid input".into(),
            }),
        ]));
        let (importer, seen) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::ImportAborted { imported, source }) => {
                assert_eq!(imported, 10);
                assert!(matches!(*source, AppError::Backend { status: 400, .. }));
            }
            other => panic!("Expected ImportAborted, got {:?}", other),
        }
        // No further batches and no further delimiter attempts
        assert_eq!(sink.calls(), vec![10, 10]);
        assert_eq!(sink.stored().len(), 10);

        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.phase, ImportPhase::Failed);
        assert_eq!(last.processed_count, 10);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_on_first_batch_aborts() {
        let file = create_temp_csv("front,back\ncat,kot\n");
        let sink = Arc::new(FakeSink::failing_with(
            (0..7)
                .map(|_| Err(AppError::RateLimited { retry_after_secs: None }))
                .collect(),
        ));
        let (importer, _) = importer(sink.clone());

        let result = importer.run(request(file.path())).await;

        assert!(matches!(
            result,
            Err(AppError::ImportAborted { imported: 0, .. })
        ));
        assert_eq!(sink.calls().len(), 7);
    }

    #[tokio::test]
    async fn test_cancellation_stops_import() {
        let mut content = String::from("front,back\n");
        for i in 0..50 {
            content.push_str(&format!("f{},b{}\n", i, i));
        }
        let file = create_temp_csv(&content);

        let cancel = CancellationToken::new();
        let sink = Arc::new(FakeSink {
            cancel_on_call: Some((2, cancel.clone())),
            ..Default::default()
        });
        let (seen, observer) = recorder();
        let importer =
            CsvImporter::new(sink.clone(), fast_settings(), observer).with_cancel(cancel);

        let result = importer.run(request(file.path())).await;

        match result {
            Err(AppError::ImportAborted { imported, source }) => {
                assert!(matches!(*source, AppError::Cancelled));
                assert!(imported >= 10 && imported <= 20, "imported {}", imported);
            }
            other => panic!("Expected ImportAborted, got {:?}", other),
        }
        assert_eq!(sink.calls().len(), 2);
        assert_eq!(
            seen.lock().unwrap().last().map(|p| p.phase),
            Some(ImportPhase::Failed)
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Preview
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_preview_reports_every_candidate() {
        let file = create_temp_csv("Przód;Tył\nkot;cat\n;pusty\n");

        let previews = preview_csv(file.path()).await;

        let attempts: Vec<&str> = previews.iter().map(|p| p.attempt.as_str()).collect();
        assert_eq!(attempts, vec!["auto", "\";\"", "\",\"", "\"\\t\""]);

        assert_eq!(previews[0].delimiter.as_deref(), Some("\";\""));
        assert_eq!(previews[0].accepted, 1);
        assert_eq!(previews[0].skipped, 1);
        assert_eq!(previews[1].accepted, 1);
        assert!(!previews[2].card_columns);
        assert_eq!(previews[2].accepted, 0);
        assert!(previews.iter().all(|p| p.error.is_none()));
    }

    #[tokio::test]
    async fn test_preview_missing_file_reports_errors() {
        let dir = tempfile::TempDir::new().unwrap();

        let previews = preview_csv(&dir.path().join("missing.csv")).await;

        assert_eq!(previews.len(), 4);
        assert!(previews.iter().all(|p| p.error.is_some()));
    }
}
