//! Sync module.
//!
//! This module contains the engine mirroring the remote store into
//! the cache. A pass lists the mailboxes, then for each of them
//! prunes the cached messages the server does not report anymore and
//! ingests the ones it does not know yet. Failed passes are restarted
//! after a reconnection, up to the bound of the retry policy.

use log::{debug, error, info, trace, warn};
use proc_lock::{lock, LockPath};
use std::{
    collections::{BTreeSet, HashSet},
    fmt, thread,
};

use crate::{
    cache::Insertion,
    session::{self, Session},
    Cache, ContentHash, Header, LocalRef, Uid,
};

use super::{Error, Result, RetryPolicy};

pub const DEFAULT_CHECKPOINT_EVERY: usize = 100;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncState {
    Idle,
    Scanning(String),
    Pruning(String),
    Ingesting(String),
    Error,
    Reconnecting,
    Fatal,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning(mailbox) => write!(f, "scanning {mailbox}"),
            Self::Pruning(mailbox) => write!(f, "pruning {mailbox}"),
            Self::Ingesting(mailbox) => write!(f, "ingesting {mailbox}"),
            Self::Error => write!(f, "error"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncEvent {
    StateChanged(SyncState),
    MailboxForgotten(String, usize),
    MessagesPruned(String, usize),
    MessageIngested(LocalRef, Insertion),
    MessageSkipped(LocalRef),
    Checkpoint,
    CheckpointFailed(String),
    Retry(usize, String),
}

/// Represents the work done by [`SyncEngine::update`], including the
/// work of restarted passes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    pub mailboxes: BTreeSet<String>,
    pub ingested: usize,
    pub pruned: usize,
    pub skipped: usize,
    pub retries: usize,
}

pub struct SyncEngine<'a> {
    ignored_mailboxes: HashSet<String>,
    checkpoint_every: usize,
    retry_policy: RetryPolicy,
    lock_name: Option<String>,
    on_progress: Box<dyn Fn(&SyncEvent) + 'a>,
    state: SyncState,
    failures: usize,
    since_checkpoint: usize,
}

impl Default for SyncEngine<'_> {
    fn default() -> Self {
        Self {
            ignored_mailboxes: HashSet::new(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            retry_policy: RetryPolicy::default(),
            lock_name: None,
            on_progress: Box::new(|_| ()),
            state: SyncState::Idle,
            failures: 0,
            since_checkpoint: 0,
        }
    }
}

impl<'a> SyncEngine<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignored_mailboxes<I, M>(mut self, mailboxes: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: ToString,
    {
        self.ignored_mailboxes = mailboxes.into_iter().map(|m| m.to_string()).collect();
        self
    }

    /// Sets the number of ingested messages between two checkpoints.
    pub fn checkpoint_every(mut self, count: usize) -> Self {
        self.checkpoint_every = count.max(1);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Prevents concurrent updates of the given account from
    /// different processes.
    pub fn lock<N>(mut self, name: N) -> Self
    where
        N: ToString,
    {
        self.lock_name = Some(name.to_string());
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncEvent) + 'a,
    {
        self.on_progress = Box::new(f);
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    fn emit(&self, event: SyncEvent) {
        (self.on_progress)(&event)
    }

    fn set_state(&mut self, state: SyncState) {
        trace!("sync state: {} -> {}", self.state, state);
        self.state = state.clone();
        self.emit(SyncEvent::StateChanged(state));
    }

    /// Saves the cache to its autosave destination. Failures are
    /// reported but do not stop the synchronization.
    fn checkpoint(&mut self, cache: &Cache) {
        self.since_checkpoint = 0;
        match cache.checkpoint() {
            Ok(()) => self.emit(SyncEvent::Checkpoint),
            Err(err) => {
                error!("cannot checkpoint cache: {}", err);
                self.emit(SyncEvent::CheckpointFailed(err.to_string()));
            }
        }
    }

    /// Mirrors the remote store into the cache. Failed passes are
    /// checkpointed, then restarted from scratch after a
    /// reconnection until the retry policy gives up.
    pub fn update<S>(&mut self, cache: &mut Cache, session: &mut S) -> Result<SyncReport>
    where
        S: Session + ?Sized,
    {
        let guard = match &self.lock_name {
            Some(name) => {
                let lock_path = LockPath::Tmp(format!("gmail-cache-{}.lock", name));
                let guard =
                    lock(&lock_path).map_err(|err| Error::LockAccountError(err, name.clone()))?;
                Some(guard)
            }
            None => None,
        };

        info!("starting synchronization");
        let mut report = SyncReport::default();

        let result = loop {
            let err = match self.pass(cache, session, &mut report) {
                Ok(()) => {
                    self.failures = 0;
                    self.set_state(SyncState::Idle);
                    info!(
                        "synchronization done: {} ingested, {} pruned, {} skipped, {} retries",
                        report.ingested, report.pruned, report.skipped, report.retries
                    );
                    break Ok(report);
                }
                Err(err) => err,
            };

            self.set_state(SyncState::Error);
            self.checkpoint(cache);
            self.failures += 1;

            if !self.retry_policy.allows(self.failures) {
                error!(
                    "cannot synchronize account after {} attempts: {}",
                    self.failures, err
                );
                let failures = self.failures;
                self.failures = 0;
                self.set_state(SyncState::Fatal);
                break Err(Error::RetriesExhaustedError(failures, Box::new(err)));
            }

            warn!(
                "synchronization pass failed ({}/{} retries), restarting: {}",
                self.failures, self.retry_policy.max_retries, err
            );
            report.retries += 1;
            self.emit(SyncEvent::Retry(self.failures, err.to_string()));

            if !self.retry_policy.delay.is_zero() {
                thread::sleep(self.retry_policy.delay);
            }

            self.set_state(SyncState::Reconnecting);
            if let Err(err) = session.reconnect() {
                warn!("cannot reconnect session: {}", err);
            }
        };

        drop(guard);
        result
    }

    /// Runs one full pass over the account, without retry.
    fn pass<S>(&mut self, cache: &mut Cache, session: &mut S, report: &mut SyncReport) -> Result<()>
    where
        S: Session + ?Sized,
    {
        let mailboxes = session.list_mailboxes()?;
        debug!("found {} mailboxes", mailboxes.len());
        trace!("mailboxes: {:?}", mailboxes);

        let listed: HashSet<&str> = mailboxes.iter().map(String::as_str).collect();
        for mailbox in cache.mailboxes() {
            if listed.contains(mailbox.as_str()) || self.ignored_mailboxes.contains(&mailbox) {
                continue;
            }
            let count = cache.forget_mailbox(&mailbox);
            info!("mailbox {} vanished, forgot {} messages", mailbox, count);
            report.pruned += count;
            self.emit(SyncEvent::MailboxForgotten(mailbox, count));
        }

        for mailbox in &mailboxes {
            if self.ignored_mailboxes.contains(mailbox) {
                debug!("skipping ignored mailbox {}", mailbox);
                continue;
            }

            self.sync_mailbox(cache, session, mailbox, report)?;
            report.mailboxes.insert(mailbox.clone());
            self.checkpoint(cache);
        }

        Ok(())
    }

    fn sync_mailbox<S>(
        &mut self,
        cache: &mut Cache,
        session: &mut S,
        mailbox: &str,
        report: &mut SyncReport,
    ) -> Result<()>
    where
        S: Session + ?Sized,
    {
        self.set_state(SyncState::Scanning(mailbox.to_owned()));
        session.select(mailbox)?;

        let mut server_uids = session.current_uids()?;
        if !server_uids.windows(2).all(|uids| uids[0] < uids[1]) {
            warn!("uids of mailbox {} are not ascending, sorting them", mailbox);
            server_uids.sort_unstable();
            server_uids.dedup();
        }
        debug!("mailbox {} holds {} messages", mailbox, server_uids.len());

        self.set_state(SyncState::Pruning(mailbox.to_owned()));
        let (stale, fresh) = diff_uids(
            cache.local_refs(mailbox).map(|local_ref| local_ref.uid),
            &server_uids,
        );

        for uid in &stale {
            cache.remove(&LocalRef::new(mailbox, *uid));
        }
        if !stale.is_empty() {
            info!("pruned {} messages from mailbox {}", stale.len(), mailbox);
            report.pruned += stale.len();
            self.emit(SyncEvent::MessagesPruned(mailbox.to_owned(), stale.len()));
        }

        self.set_state(SyncState::Ingesting(mailbox.to_owned()));
        let total = fresh.len();
        for (num, uid) in fresh.into_iter().enumerate() {
            let local_ref = LocalRef::new(mailbox, uid);
            trace!("ingesting message {}/{}: {}", num + 1, total, local_ref);

            match ingest(cache, session, local_ref.clone()) {
                Ok(insertion) => {
                    report.ingested += 1;
                    self.emit(SyncEvent::MessageIngested(local_ref, insertion));
                    self.since_checkpoint += 1;
                    if self.since_checkpoint >= self.checkpoint_every {
                        self.checkpoint(cache);
                    }
                }
                Err(err) if err.is_not_found() => {
                    warn!("message {} vanished, skipping it: {}", local_ref, err);
                    report.skipped += 1;
                    self.emit(SyncEvent::MessageSkipped(local_ref));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

fn ingest<S>(cache: &mut Cache, session: &mut S, local_ref: LocalRef) -> session::Result<Insertion>
where
    S: Session + ?Sized,
{
    let header = session.fetch_header(local_ref.uid)?;
    let size = session.message_size(local_ref.uid)?;
    let hash = ContentHash::compute(&header, size);
    Ok(cache.insert(local_ref, hash, Header::parse(&header)))
}

/// Walks the cached and the server UIDs in lockstep, both ascending.
/// Returns the cached UIDs missing from the server and the server
/// UIDs missing from the cache.
pub fn diff_uids<I>(cached: I, server: &[Uid]) -> (Vec<Uid>, Vec<Uid>)
where
    I: IntoIterator<Item = Uid>,
{
    let mut stale = Vec::new();
    let mut fresh = Vec::new();
    let mut cached = cached.into_iter().peekable();
    let mut server = server.iter().copied().peekable();

    loop {
        match (cached.peek().copied(), server.peek().copied()) {
            (Some(c), Some(s)) if c == s => {
                cached.next();
                server.next();
            }
            (Some(c), Some(s)) if c < s => {
                stale.push(c);
                cached.next();
            }
            (Some(_), Some(s)) | (None, Some(s)) => {
                fresh.push(s);
                server.next();
            }
            (Some(c), None) => {
                stale.push(c);
                cached.next();
            }
            (None, None) => break,
        }
    }

    (stale, fresh)
}

#[cfg(test)]
mod uids_diff {
    use super::diff_uids;

    #[test]
    fn identical() {
        assert_eq!((vec![], vec![]), diff_uids([1, 2, 3], &[1, 2, 3]));
    }

    #[test]
    fn pruned_in_the_middle() {
        assert_eq!((vec![2], vec![]), diff_uids([1, 2, 3], &[1, 3]));
    }

    #[test]
    fn new_messages() {
        assert_eq!((vec![], vec![4, 5]), diff_uids([1, 2, 3], &[1, 2, 3, 4, 5]));
        assert_eq!((vec![], vec![1, 2]), diff_uids([], &[1, 2]));
    }

    #[test]
    fn everything_gone() {
        assert_eq!((vec![1, 2], vec![]), diff_uids([1, 2], &[]));
    }

    #[test]
    fn interleaved() {
        assert_eq!(
            (vec![1, 4, 9], vec![2, 5, 10]),
            diff_uids([1, 3, 4, 7, 9], &[2, 3, 5, 7, 10])
        );
    }
}
