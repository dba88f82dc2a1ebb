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

//! IMAP session module.
//!
//! This module contains the IMAP implementation of the session
//! trait, built on top of the `imap` crate.

use imap_proto::NameAttribute;
use log::{debug, log_enabled, trace, warn, Level};
use native_tls::{TlsConnector, TlsStream};
use std::{
    borrow::Cow,
    io::{self, Read, Write},
    net::TcpStream,
    result,
};
use thiserror::Error;
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::{
    backend::imap::config,
    session::{self, Session},
    ImapConfig, Uid,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot get imap session: session not initialized")]
    GetSessionNotInitializedError,
    #[error("cannot find message {0}")]
    FindMsgError(Uid),
    #[error("cannot get header of message {0}")]
    GetHeaderError(Uid),
    #[error("cannot get size of message {0}")]
    GetSizeError(Uid),

    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to imap server")]
    ConnectImapServerError(#[source] imap::Error),
    #[error("cannot login to imap server")]
    LoginImapServerError(#[source] imap::Error),
    #[error("cannot list mailboxes")]
    ListMboxesError(#[source] imap::Error),
    #[error("cannot select mailbox {1}")]
    SelectMboxError(#[source] imap::Error, String),
    #[error("cannot search messages in mailbox {1}")]
    SearchMsgsError(#[source] imap::Error, String),
    #[error("cannot fetch message {1}")]
    FetchMsgError(#[source] imap::Error, Uid),

    #[error(transparent)]
    ImapConfigError(#[from] config::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FindMsgError(_) | Self::GetHeaderError(_) | Self::GetSizeError(_)
        )
    }
}

pub type Result<T> = result::Result<T, Error>;

pub enum ImapSessionStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl Read for ImapSessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapSessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

type RawSession = imap::Session<ImapSessionStream>;

pub struct ImapSession<'a> {
    config: Cow<'a, ImapConfig>,
    session: Option<RawSession>,
    /// Represents the mailbox to select again after a reconnection.
    selected: Option<String>,
}

impl<'a> ImapSession<'a> {
    pub fn new(config: Cow<'a, ImapConfig>) -> Result<Self> {
        let session = Self::connect(&config)?;
        Ok(Self {
            config,
            session: Some(session),
            selected: None,
        })
    }

    fn connect(config: &ImapConfig) -> Result<RawSession> {
        debug!("connecting to imap server {}:{}", config.host, config.port);

        let builder = TlsConnector::builder()
            .danger_accept_invalid_certs(config.insecure())
            .danger_accept_invalid_hostnames(config.insecure())
            .build()
            .map_err(Error::CreateTlsConnectorError)?;

        let mut client_builder = imap::ClientBuilder::new(&config.host, config.port);
        if config.starttls() {
            client_builder.starttls();
        }

        let client = if config.ssl() {
            client_builder.connect(|domain, tcp| {
                let connector = TlsConnector::connect(&builder, domain, tcp)?;
                Ok(ImapSessionStream::Tls(connector))
            })
        } else {
            client_builder.connect(|_, tcp| Ok(ImapSessionStream::Tcp(tcp)))
        }
        .map_err(Error::ConnectImapServerError)?;

        let mut session = client
            .login(&config.login, &config.passwd()?)
            .map_err(|res| Error::LoginImapServerError(res.0))?;
        session.debug = log_enabled!(Level::Trace);

        Ok(session)
    }

    fn session(&mut self) -> Result<&mut RawSession> {
        self.session
            .as_mut()
            .ok_or(Error::GetSessionNotInitializedError)
    }

    fn fetch(&mut self, uid: Uid, query: &str) -> Result<imap::types::Fetches> {
        self.session()?
            .uid_fetch(uid.to_string(), query)
            .map_err(|err| Error::FetchMsgError(err, uid))
    }
}

/// Tells if a mailbox with the given attributes can be selected.
fn is_selectable(attrs: &[NameAttribute]) -> bool {
    !attrs
        .iter()
        .any(|attr| matches!(attr, NameAttribute::NoSelect))
}

impl Session for ImapSession<'_> {
    fn list_mailboxes(&mut self) -> session::Result<Vec<String>> {
        let names = self
            .session()?
            .list(Some(""), Some("*"))
            .map_err(Error::ListMboxesError)?;

        let mailboxes = names
            .iter()
            .filter(|name| is_selectable(name.attributes()))
            .map(|name| decode_utf7(name.name().to_owned()))
            .collect::<Vec<_>>();
        trace!("mailboxes: {:?}", mailboxes);

        Ok(mailboxes)
    }

    fn select(&mut self, mailbox: &str) -> session::Result<()> {
        self.session()?
            .select(encode_utf7(mailbox.to_owned()))
            .map_err(|err| Error::SelectMboxError(err, mailbox.to_owned()))?;
        self.selected = Some(mailbox.to_owned());
        Ok(())
    }

    fn current_uids(&mut self) -> session::Result<Vec<Uid>> {
        let mailbox = self.selected.clone().unwrap_or_default();
        let mut uids: Vec<Uid> = self
            .session()?
            .uid_search("UNDELETED")
            .map_err(|err| Error::SearchMsgsError(err, mailbox))?
            .into_iter()
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_header(&mut self, uid: Uid) -> session::Result<Vec<u8>> {
        let fetches = self.fetch(uid, "RFC822.HEADER")?;
        let fetch = fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid))
            .ok_or(Error::FindMsgError(uid))?;
        let header = fetch.header().ok_or(Error::GetHeaderError(uid))?;
        Ok(header.to_vec())
    }

    fn message_size(&mut self, uid: Uid) -> session::Result<u64> {
        let fetches = self.fetch(uid, "RFC822.SIZE")?;
        let fetch = fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid))
            .ok_or(Error::FindMsgError(uid))?;
        let size = fetch.size.ok_or(Error::GetSizeError(uid))?;
        Ok(u64::from(size))
    }

    fn reconnect(&mut self) -> session::Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.logout() {
                warn!("cannot logout from broken imap session: {}", err);
            }
        }

        self.session = Some(Self::connect(&self.config)?);

        if let Some(mailbox) = self.selected.clone() {
            self.select(&mailbox)?;
        }

        Ok(())
    }
}

impl Drop for ImapSession<'_> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.logout() {
                debug!("cannot logout from imap session: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod imap_session {
    use imap_proto::NameAttribute;

    use super::is_selectable;

    #[test]
    fn noselect_mailboxes_are_skipped() {
        assert!(is_selectable(&[]));
        assert!(is_selectable(&[NameAttribute::Marked, NameAttribute::Unmarked]));
        assert!(!is_selectable(&[NameAttribute::NoSelect]));
        assert!(!is_selectable(&[
            NameAttribute::NoInferiors,
            NameAttribute::NoSelect
        ]));
    }
}
