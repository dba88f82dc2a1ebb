// gmail-cache-lib, a Rust library mirroring multi-label mail accounts.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Content hash module.
//!
//! This module contains the representation of the content hash, the
//! identity of a message content. Two messages sharing the same raw
//! header bytes and the same size are considered the same logical
//! message, whatever mailbox they live in.

use sha2::{Digest, Sha224};
use std::{fmt, str::FromStr};

use crate::cache::Error;

/// Represents the SHA-224 digest of a message header followed by its
/// size.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContentHash([u8; ContentHash::LEN]);

impl ContentHash {
    pub const LEN: usize = 28;

    /// Computes the hash of the given raw header bytes and message
    /// size. The size is appended as its decimal representation.
    pub fn compute(header: &[u8], size: u64) -> Self {
        let mut hasher = Sha224::new();
        hasher.update(header);
        hasher.update(size.to_string().as_bytes());

        let mut bytes = [0; Self::LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        if hex.len() != Self::LEN * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::ParseContentHashError(hex.to_owned()));
        }

        let mut bytes = [0; Self::LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::ParseContentHashError(hex.to_owned()))?;
        }

        Ok(Self(bytes))
    }
}
