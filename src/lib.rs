// Internal modules required when compiled as a library for tests.
pub mod alert;
pub mod config;
pub mod lifecycle;
pub mod notify;
pub mod probe;
pub mod render;
pub mod sampler;
pub mod store;
// Re-export commonly used types for tests
pub use alert::{AlertState, Verdict};
pub use store::{ArchiveSpec, Sample, Store, StoreError, DEFAULT_ARCHIVES};
