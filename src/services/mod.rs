//! Read-side services over the runtime: metadata projection, filters and
//! worker enumeration.

pub mod enumeration;
pub mod filter;
pub mod metadata;

pub use enumeration::{ScanCursor, WorkerPage};
pub use filter::{
    FilterComparator, StringFilterComparator, WorkerAllFilter, WorkerAnyFilter,
    WorkerPropertyFilter,
};
pub use metadata::WorkerMetadata;
