//! Header module.
//!
//! This module extracts from raw header bytes the only two pieces of
//! information the cache needs: the Message-ID and the ids of the
//! messages it refers to.

use log::{trace, warn};
use mailparse::MailHeaderMap;
use regex::Regex;
use std::{collections::BTreeSet, sync::OnceLock};

const ID_TOKEN: &str = r"<[^<>]+>";

fn id_tokens(value: &str) -> impl Iterator<Item = String> + '_ {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(ID_TOKEN).expect("message id pattern should be valid"))
        .find_iter(value)
        .map(|token| token.as_str().to_owned())
}

/// Represents the threading headers of a message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// Represents the Message-ID header.
    pub message_id: Option<String>,
    /// Represents the bracket-delimited ids found in the References
    /// and In-Reply-To headers.
    pub references: BTreeSet<String>,
}

impl Header {
    pub fn parse(raw: &[u8]) -> Self {
        let headers = match mailparse::parse_headers(raw) {
            Ok((headers, _)) => headers,
            Err(err) => {
                warn!("cannot parse message header, skipping it: {}", err);
                return Self::default();
            }
        };

        let message_id = headers
            .get_first_value("Message-ID")
            .and_then(|value| parse_message_id(&value));

        let references = headers
            .get_all_values("References")
            .into_iter()
            .chain(headers.get_all_values("In-Reply-To"))
            .flat_map(|value| id_tokens(&value).collect::<Vec<_>>())
            .filter(|id| Some(id) != message_id.as_ref())
            .collect();

        let header = Self {
            message_id,
            references,
        };
        trace!("parsed header: {:?}", header);
        header
    }
}

/// Extracts the Message-ID from the raw header value. Falls back to
/// the trimmed value for ids missing their angle brackets.
fn parse_message_id(value: &str) -> Option<String> {
    id_tokens(value).next().or_else(|| {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_owned())
        }
    })
}
