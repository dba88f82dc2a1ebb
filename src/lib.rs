pub(crate) mod process;

pub mod backend;
pub use backend::*;

pub mod config;
pub use config::SyncConfig;

pub mod domain;
pub use domain::*;
