pub mod config;
pub use config::ImapConfig;

pub mod session;
pub use session::{Error, ImapSession, Result};
