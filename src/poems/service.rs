use std::sync::Arc;

use chrono::Utc;

use crate::db::LocalStore;
use crate::error::{AppError, ErrorKind, Result};
use crate::models::{sort_newest_first, Comment, Favorite, NewComment, NewPoem, Poem, PoemDetail};
use crate::services::DataBackend;

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    /// The backend failed with `cause` and the local store answered instead.
    Local { cause: ErrorKind },
}

/// A value together with the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Fetched<T> {
    pub fn remote(value: T) -> Self {
        Self {
            value,
            source: Source::Remote,
        }
    }

    pub fn local(value: T, cause: &AppError) -> Self {
        Self {
            value,
            source: Source::Local { cause: cause.kind() },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, Source::Local { .. })
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Poems, favorites, comments and submissions. Remote first; the operations
/// returning `Fetched` degrade to the local store and say so.
#[derive(Clone)]
pub struct PoemService {
    backend: Arc<dyn DataBackend>,
    local: LocalStore,
}

impl PoemService {
    pub fn new(backend: Arc<dyn DataBackend>, local: LocalStore) -> Self {
        Self { backend, local }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Local submissions first, in storage order, then the remote poems.
    pub async fn list_poems(&self) -> Result<Fetched<Vec<Poem>>> {
        match self.backend.list_poems().await {
            Ok(remote) => {
                let mut poems = self.readable_submissions().await;
                poems.extend(remote);
                Ok(Fetched::remote(poems))
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::PolicyDenied | ErrorKind::RelationMissing => {
                        tracing::warn!("Poem table not readable, using local submissions: {}", e)
                    }
                    _ => tracing::error!("Failed to fetch poems, using local submissions: {}", e),
                }
                let poems = self.readable_submissions().await;
                Ok(Fetched::local(poems, &e))
            }
        }
    }

    /// Local submissions for read paths. An unreadable store counts as empty.
    async fn readable_submissions(&self) -> Vec<Poem> {
        self.local.submissions().await.unwrap_or_else(|e| {
            tracing::warn!("Local submissions unreadable, treating as empty: {}", e);
            Vec::new()
        })
    }

    pub async fn get_poem_by_id(&self, id: &str) -> Result<PoemDetail> {
        self.backend.poem_detail(id).await.map_err(|e| {
            tracing::error!(%id, "Failed to fetch poem detail: {}", e);
            e
        })
    }

    pub async fn search_poems(&self, query: &str) -> Result<Vec<Poem>> {
        let query = query.trim();
        if query.is_empty() {
            return self.backend.list_poems().await;
        }
        self.backend.search_poems(query).await.map_err(|e| {
            tracing::error!(%query, "Search failed: {}", e);
            e
        })
    }

    pub async fn popular_poems(&self, limit: usize) -> Result<Vec<Poem>> {
        self.backend.popular_poems(limit).await
    }

    pub async fn poems_by_dynasty(&self, dynasty: &str) -> Result<Vec<Poem>> {
        self.backend.poems_by_dynasty(dynasty).await
    }

    pub async fn local_submissions(&self) -> Result<Vec<Poem>> {
        self.local.submissions().await
    }

    pub async fn add_favorite(&self, user_id: &str, poem_id: &str) -> Result<Fetched<Favorite>> {
        let e = match self.backend.insert_favorite(user_id, poem_id).await {
            Ok(favorite) => return Ok(Fetched::remote(favorite)),
            Err(e) => e,
        };

        if e.is_unique_violation() {
            if let Ok(Some(existing)) = self.backend.find_favorite(user_id, poem_id).await {
                tracing::debug!(%poem_id, "Poem already favorited");
                return Ok(Fetched::remote(existing));
            }
        }

        tracing::warn!(%poem_id, "Remote favorite failed, storing locally: {}", e);
        self.local.add_favorite(user_id, poem_id).await?;
        Ok(Fetched::local(
            Favorite::synthesized(user_id, poem_id, Utc::now()),
            &e,
        ))
    }

    pub async fn remove_favorite(&self, user_id: &str, poem_id: &str) -> Result<Fetched<()>> {
        match self.backend.delete_favorite(user_id, poem_id).await {
            Ok(()) => Ok(Fetched::remote(())),
            Err(e) => {
                tracing::warn!(%poem_id, "Remote unfavorite failed, updating local list: {}", e);
                self.local.remove_favorite(user_id, poem_id).await?;
                Ok(Fetched::local((), &e))
            }
        }
    }

    /// The user's favorite poems, most recently favorited first.
    pub async fn get_user_favorites(&self, user_id: &str) -> Result<Fetched<Vec<Poem>>> {
        let ids = match self.backend.favorite_poem_ids(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Remote favorites unavailable, using local list: {}", e);
                let ids = self.local.favorites(user_id).await.unwrap_or_else(|local| {
                    tracing::warn!("Local favorites unreadable, treating as empty: {}", local);
                    Vec::new()
                });
                let poems = self.resolve_local_favorites(&ids).await;
                return Ok(Fetched::local(poems, &e));
            }
        };

        if ids.is_empty() {
            return Ok(Fetched::remote(Vec::new()));
        }

        match self.backend.poems_by_ids(&ids).await {
            Ok(poems) => Ok(Fetched::remote(in_id_order(&ids, poems))),
            Err(e) => {
                tracing::warn!("Failed to resolve favorite poems: {}", e);
                Ok(Fetched::remote(Vec::new()))
            }
        }
    }

    /// Resolve ids against the remote poem table and the local submissions.
    async fn resolve_local_favorites(&self, ids: &[String]) -> Vec<Poem> {
        if ids.is_empty() {
            return Vec::new();
        }

        let (remote, mut candidates) =
            futures::join!(self.backend.poems_by_ids(ids), self.readable_submissions());

        match remote {
            Ok(poems) => candidates.extend(poems),
            Err(e) => tracing::debug!("Remote poem lookup failed: {}", e),
        }

        let poems = in_id_order(ids, candidates);
        if poems.len() < ids.len() {
            tracing::warn!(
                "Dropped {} local favorites that no longer resolve",
                ids.len() - poems.len()
            );
        }
        poems
    }

    pub async fn add_comment(&self, poem_id: &str, user_id: &str, content: &str) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("comment must not be empty".into()));
        }

        let comment = NewComment {
            poem_id: poem_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
        };
        self.backend.insert_comment(&comment).await.map_err(|e| {
            tracing::error!(%poem_id, "Failed to add comment: {}", e);
            e
        })
    }

    pub async fn get_poem_comments(&self, poem_id: &str) -> Result<Vec<Comment>> {
        let mut comments = self.backend.poem_comments(poem_id).await.map_err(|e| {
            tracing::error!(%poem_id, "Failed to fetch comments: {}", e);
            e
        })?;
        sort_newest_first(&mut comments);
        Ok(comments)
    }

    pub async fn submit_poem(&self, poem: NewPoem) -> Result<Fetched<Poem>> {
        poem.validate()?;

        let now = Utc::now();
        match self.backend.insert_poem(&poem, now).await {
            Ok(stored) => Ok(Fetched::remote(stored)),
            Err(e) => {
                if e.kind() == ErrorKind::PolicyDenied {
                    tracing::warn!("Submission blocked by row-level security, saving locally");
                } else {
                    tracing::error!("Submission failed, saving locally: {}", e);
                }
                let stored = self.local.add_submission(poem, now).await?;
                Ok(Fetched::local(stored, &e))
            }
        }
    }
}

/// Order `poems` by position of their id in `ids`, dropping unmatched ids
/// and duplicates.
fn in_id_order(ids: &[String], poems: Vec<Poem>) -> Vec<Poem> {
    let mut ordered = Vec::with_capacity(ids.len());
    for id in ids {
        if ordered.iter().any(|p: &Poem| &p.id == id) {
            continue;
        }
        if let Some(poem) = poems.iter().find(|p| &p.id == id) {
            ordered.push(poem.clone());
        }
    }
    ordered
}
