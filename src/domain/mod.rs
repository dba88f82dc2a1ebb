pub mod envelope;
pub use envelope::*;

pub mod cache;
pub use cache::{Cache, Insertion, LoadStatus};

pub mod thread;
pub use thread::{Thread, ThreadKey};

pub mod label;

pub mod sync;
pub use sync::{RetryPolicy, SyncEngine, SyncEvent, SyncReport, SyncState};
