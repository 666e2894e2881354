//! Streaming utilities for reading large CSV files.
//!
//! This module provides delimiter detection and a backpressured, record-aware
//! CSV reader that keeps fields with embedded separators and newlines inside
//! quotes intact without loading the whole file into memory.

pub mod delimiter;
pub mod row_reader;

pub use delimiter::{sniff_delimiter, Delimiter};
pub use row_reader::{ParseStats, RowReader, RowStream};
