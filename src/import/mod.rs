//! Import pipeline building blocks: parsed rows, progress events and the
//! batch writer that persists them.

pub mod progress;
pub mod row;
pub mod writer;

pub use progress::{ImportPhase, ImportProgress, NoProgress, ProgressObserver};
pub use row::{ImportRow, RowTemplate};
pub use writer::{BatchWriter, RetryPolicy, RowSink};
