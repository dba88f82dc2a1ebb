pub mod envelope;
pub use envelope::{Envelope, LocalRef, Uid};

pub mod hash;
pub use hash::ContentHash;

pub mod header;
pub use header::Header;
