use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AuthUser, Comment, Favorite, NewComment, NewPoem, Poem, PoemDetail, ProfileUpdate, Session,
};

/// Table operations against the hosted backend.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// All poems, newest first.
    async fn list_poems(&self) -> Result<Vec<Poem>>;

    /// One poem with its comments. No matching row is `AppError::NotFound`.
    async fn poem_detail(&self, id: &str) -> Result<PoemDetail>;

    /// Case-insensitive substring match over title, content and author.
    async fn search_poems(&self, query: &str) -> Result<Vec<Poem>>;

    async fn poems_by_ids(&self, ids: &[String]) -> Result<Vec<Poem>>;

    async fn poems_by_dynasty(&self, dynasty: &str) -> Result<Vec<Poem>>;

    /// Poems ranked by number of favorites.
    async fn popular_poems(&self, limit: usize) -> Result<Vec<Poem>>;

    async fn insert_poem(&self, poem: &NewPoem, now: DateTime<Utc>) -> Result<Poem>;

    async fn insert_favorite(&self, user_id: &str, poem_id: &str) -> Result<Favorite>;

    async fn find_favorite(&self, user_id: &str, poem_id: &str) -> Result<Option<Favorite>>;

    async fn delete_favorite(&self, user_id: &str, poem_id: &str) -> Result<()>;

    /// Favorited poem ids for a user, most recently favorited first.
    async fn favorite_poem_ids(&self, user_id: &str) -> Result<Vec<String>>;

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment>;

    async fn poem_comments(&self, poem_id: &str) -> Result<Vec<Comment>>;

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<()>;
}

/// What the backend returns from a sign-up call.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: Option<AuthUser>,
    pub session: Option<Session>,
}

/// Authentication endpoints. Implementations hold the current session.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<SignUpResponse>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    /// The signed-in user, or `None` without a session.
    async fn current_user(&self) -> Result<Option<AuthUser>>;

    async fn reset_password(&self, email: &str) -> Result<()>;
}

/// A backend offering both tables and auth.
pub trait Backend: DataBackend + AuthBackend {}

impl<T: DataBackend + AuthBackend> Backend for T {}
