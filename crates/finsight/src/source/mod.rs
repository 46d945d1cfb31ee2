mod memory;

pub use finsight_core::source::{RecordSource, SourceError};
pub use memory::InMemoryRecordSource;
