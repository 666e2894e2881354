//! Field-delimiter candidates and content-based delimiter sniffing.

use std::fmt;

use csv::ReaderBuilder;

/// Bytes inspected when sniffing the delimiter (64 KB).
pub const SNIFF_SAMPLE_SIZE: usize = 64 * 1024;

/// Records inspected per sniffing candidate.
const SNIFF_PREVIEW_RECORDS: usize = 10;

/// Separators considered by auto-detection, in tie-break order.
const SNIFF_CANDIDATES: &[u8] = &[b',', b'\t', b'|', b';', 0x1E, 0x1F];

/// Separator used when sniffing finds no convincing candidate.
const DEFAULT_DELIMITER: u8 = b',';

/// Minimum average field count for a sniffing candidate to be accepted.
const MIN_AVG_FIELDS: f64 = 1.99;

/// A field-separator strategy for one parse attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Let the content decide.
    Auto,
    Semicolon,
    Comma,
    Tab,
}

impl Delimiter {
    /// Order in which parse attempts are made.
    pub const FALLBACK_ORDER: [Delimiter; 4] = [
        Delimiter::Auto,
        Delimiter::Semicolon,
        Delimiter::Comma,
        Delimiter::Tab,
    ];

    /// The explicit separator byte, or `None` for auto-detection.
    pub fn byte(self) -> Option<u8> {
        match self {
            Delimiter::Auto => None,
            Delimiter::Semicolon => Some(b';'),
            Delimiter::Comma => Some(b','),
            Delimiter::Tab => Some(b'\t'),
        }
    }

    /// Label used in diagnostics: `auto`, or the separator as a quoted literal.
    pub fn label(self) -> String {
        match self.byte() {
            None => "auto".to_string(),
            Some(b) => describe_byte(b),
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Quoted, escaped rendering of a separator byte (e.g. `";"`, `"\t"`).
pub fn describe_byte(b: u8) -> String {
    match b {
        b'\t' => "\"\\t\"".to_string(),
        0x1E => "\"\\u001e\"".to_string(),
        0x1F => "\"\\u001f\"".to_string(),
        other => format!("\"{}\"", other as char),
    }
}

/// Guesses the field separator from the beginning of a file.
///
/// Each candidate parses the first few non-blank records of the sample. A
/// candidate replaces the current best when its field-count drift between
/// consecutive records is no larger and its average field count is strictly
/// larger, and only if that average reaches two fields. Falls back to comma.
pub fn sniff_delimiter(sample: &[u8]) -> u8 {
    let sample = complete_lines(sample);

    let mut best: Option<(u8, usize, f64)> = None;

    for &candidate in SNIFF_CANDIDATES {
        let Some((delta, avg)) = field_stats(sample, candidate) else {
            continue;
        };

        let better = match best {
            None => true,
            Some((_, best_delta, best_avg)) => delta <= best_delta && avg > best_avg,
        };

        if better && avg > MIN_AVG_FIELDS {
            best = Some((candidate, delta, avg));
        }
    }

    let chosen = best.map(|(b, _, _)| b).unwrap_or(DEFAULT_DELIMITER);

    tracing::debug!(
        delimiter = %describe_byte(chosen),
        sniffed = best.is_some(),
        "Sniffed CSV delimiter"
    );

    chosen
}

/// Drops a trailing partial line so a truncated sample does not skew counts.
fn complete_lines(sample: &[u8]) -> &[u8] {
    match sample.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &sample[..=pos],
        None => sample,
    }
}

/// Field-count drift and average over the preview records, or `None` if the
/// sample yields no non-blank record for this separator.
fn field_stats(sample: &[u8], delimiter: u8) -> Option<(usize, f64)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(sample);

    let mut delta = 0usize;
    let mut total_fields = 0usize;
    let mut counted = 0usize;
    let mut previous: Option<usize> = None;

    for record in reader.byte_records().take(SNIFF_PREVIEW_RECORDS) {
        // Undecodable tail of a sample is not a reason to reject a candidate
        let Ok(record) = record else { break };

        if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }

        let fields = record.len();
        total_fields += fields;
        counted += 1;

        if let Some(prev) = previous {
            delta += fields.abs_diff(prev);
        }
        previous = Some(fields);
    }

    if counted == 0 {
        return None;
    }

    Some((delta, total_fields as f64 / counted as f64))
}
