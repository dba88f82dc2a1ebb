pub mod cache;
pub use cache::{Cache, Insertion};

mod error;
pub use error::{Error, Result};

pub mod snapshot;
pub use snapshot::LoadStatus;
