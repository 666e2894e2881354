//! Command handlers invoked by the front end.
//!
//! This module contains the import entry points that tie the CSV reader,
//! batch writer and backend client together.

pub mod import;

pub use import::*;
