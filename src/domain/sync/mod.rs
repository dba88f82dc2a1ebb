mod error;
pub use error::{Error, Result};

pub mod retry;
pub use retry::RetryPolicy;

pub mod sync;
pub use sync::{diff_uids, SyncEngine, SyncEvent, SyncReport, SyncState};
