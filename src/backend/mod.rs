//! Hosted backend access layer.
//!
//! - **Secure credential handling** via `secrecy::SecretString`
//! - **Safe logging** that never leaks keys, tokens or card contents
//! - **Error mapping** of rate limits, oversized payloads and REST error
//!   bodies onto `AppError`

pub mod cards;
pub mod client;

pub use cards::CardRecord;
pub use client::{LoggingMode, SupabaseClient};
