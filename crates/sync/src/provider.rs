//! Provider capabilities and the generic ref-based provider.

use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::Stream;
use std::pin::Pin;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::webhook::{PushEvent, Webhook};
use crate::{GitRef, RefKind, SyncEvent};

pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<SyncEvent>> + Send + 'a>>;

/// A source of packages, as seen by the [`Synchronizer`](crate::Synchronizer).
///
/// Providers only produce [`SyncEvent`]s; they never touch the index. Any
/// network I/O happens while producing an event, so it is always finished
/// before the index opens a transaction.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Enumerate every current ref as an upsert.
    ///
    /// An `Err` of kind [`Upstream`](ErrorKind::Upstream) means one ref was
    /// skipped and the stream continues; [`Listing`](ErrorKind::Listing) ends
    /// the stream.
    fn synchronize(&self) -> EventStream<'_>;

    /// Turn a webhook delivery into at most one event.
    ///
    /// `Ok(None)` for deliveries that carry no ref change (pings, pushes to
    /// non-version refs).
    async fn handle_webhook(&self, webhook: &Webhook) -> Result<Option<SyncEvent>>;
}

/// A ref as listed by the host, with the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub git_ref: GitRef,
    pub commit: String,
}

/// The host-specific half of a git-based provider: API calls and payload
/// formats. Everything else lives in [`RefProvider`].
#[async_trait]
pub trait RefSource: Send + Sync {
    fn name(&self) -> &str;

    /// Tracked repositories, in the host's own naming.
    fn repositories(&self) -> Vec<String>;

    /// One page of tags or branches. Pages are numbered from 1.
    async fn list_refs(&self, repository: &str, kind: RefKind, page: u32, per_page: u32) -> Result<Vec<RemoteRef>>;

    /// Raw `composer.json` bytes at `commit`.
    async fn fetch_manifest(&self, repository: &str, commit: &str) -> Result<Vec<u8>>;

    /// Download URL of the zip archive at `commit`.
    fn archive_url(&self, repository: &str, commit: &str) -> String;

    /// Validate and parse a push delivery.
    fn parse_push(&self, webhook: &Webhook) -> Result<Option<PushEvent>>;
}

/// A [`Provider`] for any [`RefSource`].
///
/// Full resyncs walk every tracked repository's tags, then branches, a page
/// at a time, and stop paging once a page comes back short. Webhooks and
/// resyncs derive version labels and sync keys through the same [`GitRef`]
/// methods, so a ref deleted by webhook always finds the entry a resync
/// created.
pub struct RefProvider<S> {
    source: S,
}

impl<S: RefSource> RefProvider<S> {
    pub const PAGE_SIZE: u32 = 100;

    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn upsert_event(&self, repository: &str, git_ref: &GitRef, commit: &str) -> Result<SyncEvent> {
        let manifest = self.source.fetch_manifest(repository, commit).await.or_raise(|| ErrorKind::Upstream)?;
        Ok(SyncEvent::Upsert {
            manifest,
            version: git_ref.version_label(),
            dist_url: self.source.archive_url(repository, commit),
            sync_key: git_ref.sync_key(repository),
        })
    }
}

#[async_trait]
impl<S: RefSource> Provider for RefProvider<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn synchronize(&self) -> EventStream<'_> {
        Box::pin(stream! {
            for repository in self.source.repositories() {
                for kind in RefKind::ALL {
                    let mut page = 1;
                    loop {
                        let refs = match self.source.list_refs(&repository, kind, page, Self::PAGE_SIZE).await {
                            Ok(refs) => refs,
                            Err(e) => {
                                tracing::error!(provider = self.source.name(), repository = %repository, %kind, page, "cannot list refs");
                                let err: Result<SyncEvent> = Err(e).or_raise(|| ErrorKind::Listing);
                                yield err;
                                return;
                            },
                        };
                        let last_page = refs.len() < Self::PAGE_SIZE as usize;
                        for remote in refs {
                            yield self.upsert_event(&repository, &remote.git_ref, &remote.commit).await;
                        }
                        if last_page {
                            break;
                        }
                        page += 1;
                    }
                }
            }
        })
    }

    #[instrument(skip_all, fields(provider = self.source.name()))]
    async fn handle_webhook(&self, webhook: &Webhook) -> Result<Option<SyncEvent>> {
        let Some(push) = self.source.parse_push(webhook)? else {
            return Ok(None);
        };
        if push.deleted {
            return Ok(Some(SyncEvent::Remove(push.git_ref.sync_key(&push.repository))));
        }
        self.upsert_event(&push.repository, &push.git_ref, &push.commit).await.map(Some)
    }
}
