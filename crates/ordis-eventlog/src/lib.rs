pub mod entry;
pub mod log;

pub use entry::{EntryFilter, EventKind, EventLogEntry};
pub use log::{EventLog, LogStats};
