pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod import;
pub mod state;
pub mod streaming;

pub use error::AppError;
