//! Recipient resolution: member ids to addressable user ids.
//!
//! A workspace event names memberships; notifications go to users. The resolver
//! bridges the two with batched "id is any of {…}" lookups against the member
//! store, never one round trip per member.
//!
//! Stores cap how many values a single contained-in predicate may carry, so the
//! input is split into `ceil(N / batch_limit)` chunks. Dropping this split would
//! silently lose recipients once a group outgrows the limit.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::PgPool;
use uuid::Uuid;

use atrium_common::error::AppError;
use atrium_common::types::{Member, MemberId, UserId};

use crate::error::ResolveError;

/// Batch-lookup contract over the membership store.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Maximum number of ids accepted by one [`find_members`](Self::find_members) call.
    fn batch_limit(&self) -> usize;

    /// Fetch every membership whose id is in `ids`, in a single round trip.
    async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, AppError>;

    /// Ids of every membership in a workspace.
    async fn workspace_member_ids(&self, workspace_id: Uuid) -> Result<Vec<MemberId>, AppError>;
}

/// PostgreSQL-backed member directory.
#[derive(Clone)]
pub struct PgMemberDirectory {
    pool: PgPool,
    batch_limit: usize,
}

impl PgMemberDirectory {
    pub fn new(pool: PgPool, batch_limit: usize) -> Self {
        Self {
            pool,
            batch_limit: batch_limit.max(1),
        }
    }
}

#[async_trait]
impl MemberDirectory for PgMemberDirectory {
    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, AppError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let members: Vec<Member> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, user_id, role, created_at
            FROM members
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn workspace_member_ids(&self, workspace_id: Uuid) -> Result<Vec<MemberId>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM members WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| MemberId(id)).collect())
    }
}

/// Distinct users to notify, iterated in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet(BTreeSet<UserId>);

impl RecipientSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.0.contains(user)
    }

    pub fn insert(&mut self, user: UserId) -> bool {
        self.0.insert(user)
    }

    /// Remove one user, e.g. the actor who triggered the event.
    pub fn without(mut self, user: &UserId) -> Self {
        self.0.remove(user);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = UserId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<UserId> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<UserId> for RecipientSet {
    fn extend<I: IntoIterator<Item = UserId>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for RecipientSet {
    type Item = UserId;
    type IntoIter = std::collections::btree_set::IntoIter<UserId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Chunk lookups allowed in flight at once for a single `resolve` call.
const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 4;

/// Resolves member ids into a [`RecipientSet`].
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn MemberDirectory>,
    lookup_timeout: Option<Duration>,
    max_concurrent_lookups: usize,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn MemberDirectory>) -> Self {
        Self {
            directory,
            lookup_timeout: None,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }

    /// Cap how many chunk lookups one call keeps in flight. Zero is treated as one.
    pub fn with_max_concurrent_lookups(mut self, limit: usize) -> Self {
        self.max_concurrent_lookups = limit.max(1);
        self
    }

    /// Fail a chunk lookup that takes longer than `timeout`.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn directory(&self) -> &Arc<dyn MemberDirectory> {
        &self.directory
    }

    /// Map memberships to their users.
    ///
    /// Empty input returns immediately without touching the store. Otherwise the
    /// sorted ids are split into chunks of at most `batch_limit`, each chunk is
    /// looked up once (up to `max_concurrent_lookups` chunks at a time) and
    /// results are merged. Any
    /// chunk failure fails the whole call; there are no retries.
    pub async fn resolve(
        &self,
        member_ids: &HashSet<MemberId>,
    ) -> Result<RecipientSet, ResolveError> {
        if member_ids.is_empty() {
            return Ok(RecipientSet::new());
        }

        let limit = self.directory.batch_limit().max(1);
        let mut ordered: Vec<MemberId> = member_ids.iter().copied().collect();
        ordered.sort_unstable();

        let lookups: Vec<_> = ordered
            .chunks(limit)
            .enumerate()
            .map(|(chunk, ids)| self.lookup_chunk(chunk, ids))
            .collect();
        let batches: Vec<Vec<Member>> = stream::iter(lookups)
            .buffer_unordered(self.max_concurrent_lookups)
            .try_collect()
            .await?;

        let recipients: RecipientSet = batches
            .into_iter()
            .flatten()
            .map(|member| member.user_id)
            .collect();

        tracing::debug!(
            members = member_ids.len(),
            chunks = ordered.len().div_ceil(limit),
            recipients = recipients.len(),
            "Resolved recipients"
        );

        Ok(recipients)
    }

    /// Resolve every member of a workspace.
    pub async fn resolve_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<RecipientSet, ResolveError> {
        let ids = self
            .directory
            .workspace_member_ids(workspace_id)
            .await
            .map_err(|source| {
                tracing::warn!(
                    workspace_id = %workspace_id,
                    error = %source,
                    "Workspace member listing failed"
                );
                ResolveError::Expansion {
                    workspace_id,
                    source,
                }
            })?;

        self.resolve(&ids.into_iter().collect()).await
    }

    async fn lookup_chunk(
        &self,
        chunk: usize,
        ids: &[MemberId],
    ) -> Result<Vec<Member>, ResolveError> {
        let lookup = self.directory.find_members(ids);
        let result = match self.lookup_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lookup).await.map_err(|_| {
                tracing::warn!(chunk, ids = ids.len(), "Member lookup timed out");
                ResolveError::Timeout {
                    chunk,
                    timeout_ms: timeout.as_millis() as u64,
                }
            })?,
            None => lookup.await,
        };

        result.map_err(|source| {
            tracing::warn!(chunk, ids = ids.len(), error = %source, "Member lookup failed");
            ResolveError::Lookup { chunk, source }
        })
    }
}
