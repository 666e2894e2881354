use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "apikey",
    "api_key",
    "access_token",
    "service_role",
    "authorization:",
];

/// Message fragments (lowercase) a backend uses to report an oversized request body.
const PAYLOAD_TOO_LARGE_PATTERNS: &[&str] = &[
    "payload too large",
    "request entity too large",
    "entity too large",
];

/// Hint appended to import failures so the user can fix the file.
const IMPORT_HINT: &str = "Make sure the header row names the columns \"Przód\" and \"Tył\" \
     (or front/back) and that fields are separated by semicolons, commas or tabs.";

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Returns true if a backend message reports an oversized request body.
fn mentions_payload_too_large(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    PAYLOAD_TOO_LARGE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// How the batch writer should react to a failed insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request body was rejected as too large; split the batch.
    PayloadTooLarge,
    /// Transient condition; back off and retry the same batch.
    Retryable,
    /// Anything else; give up.
    Fatal,
}

/// User-friendly error presentation for the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation ────────────────────────────────────────────────────────────
    #[error("No destination folder selected")]
    MissingFolder,

    #[error("Not authenticated")]
    NotAuthenticated,

    // ── Import ────────────────────────────────────────────────────────────────
    #[error("No flashcards recognized (tried delimiters: {})", tried.join(", "))]
    NoRowsRecognized {
        tried: Vec<String>,
        /// Why the last attempt that failed to parse did so.
        last_parse_error: Option<Box<AppError>>,
    },

    #[error("Import aborted after {imported} rows: {source}")]
    ImportAborted {
        imported: u64,
        #[source]
        source: Box<AppError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Backend ───────────────────────────────────────────────────────────────
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("File is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    #[error("File read error: {0}")]
    FileRead(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classifies an insert failure for the batch writer.
    ///
    /// Network failures and timeouts cannot be told apart from a struggling
    /// backend, so they are retried like 5xx responses.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AppError::PayloadTooLarge(_) => FailureKind::PayloadTooLarge,
            AppError::Backend { status: 413, .. } => FailureKind::PayloadTooLarge,
            AppError::Backend { message, .. } if mentions_payload_too_large(message) => {
                FailureKind::PayloadTooLarge
            }
            AppError::Backend { status, .. } if (500..600).contains(status) => {
                FailureKind::Retryable
            }
            AppError::RateLimited { .. } | AppError::Timeout | AppError::ConnectionFailed(_) => {
                FailureKind::Retryable
            }
            _ => FailureKind::Fatal,
        }
    }

    /// Wraps a terminal failure with the number of rows persisted before it.
    pub fn aborted(imported: u64, source: AppError) -> Self {
        match source {
            already @ AppError::ImportAborted { .. } => already,
            other => AppError::ImportAborted {
                imported,
                source: Box::new(other),
            },
        }
    }

    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks keys, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Validation ────────────────────────────────────────────────────
            AppError::MissingFolder => ErrorPresentation {
                title: "No Folder Selected".into(),
                message: "Choose the folder the flashcards should be imported into.".into(),
                action: Some("Select a destination folder".into()),
            },

            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "You need to be logged in to import flashcards.".into(),
                action: Some("Log in and try again".into()),
            },

            // ── Import ────────────────────────────────────────────────────────
            AppError::NoRowsRecognized {
                tried,
                last_parse_error,
            } => {
                let mut message = format!(
                    "No importable rows were found. Tried delimiters: {}.",
                    tried.join(", ")
                );
                let mut action = IMPORT_HINT.to_string();
                if let Some(cause) = last_parse_error {
                    let cause = cause.to_presentation();
                    message.push(' ');
                    message.push_str(&cause.message);
                    if let Some(fix) = cause.action {
                        action = fix;
                    }
                }
                ErrorPresentation {
                    title: "No Flashcards Recognized".into(),
                    message,
                    action: Some(action),
                }
            }

            AppError::ImportAborted { imported, source } => {
                let cause = source.to_presentation();
                ErrorPresentation {
                    title: "Import Interrupted".into(),
                    message: format!(
                        "{} flashcards were imported before the import stopped: {}",
                        imported, cause.message
                    ),
                    action: Some(cause.action.unwrap_or_else(|| IMPORT_HINT.into())),
                }
            }

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            // ── Backend ───────────────────────────────────────────────────────
            AppError::PayloadTooLarge(_) => ErrorPresentation {
                title: "Flashcard Too Large".into(),
                message: "The server rejected a flashcard because it is too large.".into(),
                action: Some("Shorten the longest flashcards and try again".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The server is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::Backend { status, message } => ErrorPresentation {
                title: "Server Error".into(),
                message: sanitize_message(
                    &format!("HTTP {}: {}", status, message),
                    "The server rejected the request.",
                ),
                action: None,
            },

            AppError::Timeout => ErrorPresentation {
                title: "Request Timed Out".into(),
                message: "The server did not answer in time.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── File / CSV ────────────────────────────────────────────────────
            AppError::NotUtf8 => ErrorPresentation {
                title: "Invalid File Encoding".into(),
                message: "The file must be UTF-8 encoded. Please re-save your file with UTF-8 encoding.".into(),
                action: Some("Convert file to UTF-8".into()),
            },

            AppError::CsvInvalid(msg) => ErrorPresentation {
                title: "Invalid CSV".into(),
                message: format!("The CSV file has a formatting problem: {}", msg),
                action: Some("Fix the CSV file and try again".into()),
            },

            AppError::FileRead(_) => ErrorPresentation {
                title: "Cannot Read File".into(),
                message: "The selected file could not be read.".into(),
                action: Some("Check that the file exists and try again".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to the server. Please check your internet connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The application is not configured correctly."),
                action: Some("Check the environment settings".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
