pub mod session;
pub use session::Session;

#[cfg(feature = "imap-backend")]
pub mod imap;
#[cfg(feature = "imap-backend")]
pub use self::imap::{ImapConfig, ImapSession};
