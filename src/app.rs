use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::{LocalStore, Repository};
use crate::error::{AppError, Result};
use crate::models::{Comment, Favorite, NewPoem, Poem, PoemDetail, SignUpOutcome, User};
use crate::poems::{Fetched, PoemService, Source};
use crate::services::{Backend, MemoryBackend, SupabaseClient};
use crate::state::{reduce, AppState, Mutation};
use crate::translate::user_message;

/// Owns the application state and runs every action against it.
pub struct App {
    state: watch::Sender<Arc<AppState>>,
    poems: PoemService,
    auth: AuthService,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let local = LocalStore::new(Repository::new(&config.db_path).await?);

        match config.backend_url.as_deref().filter(|_| !config.is_offline()) {
            Some(url) => {
                let client = SupabaseClient::new(
                    url,
                    config.anon_key.clone().unwrap_or_default(),
                    Duration::from_secs(config.request_timeout_secs),
                )?;
                Ok(Self::with_backend(Arc::new(client), local))
            }
            None => {
                tracing::info!("No backend configured, using the in-process sample library");
                let backend = MemoryBackend::with_sample_poems().await;
                Ok(Self::with_backend(Arc::new(backend), local))
            }
        }
    }

    pub fn with_backend<B: Backend + 'static>(backend: Arc<B>, local: LocalStore) -> Self {
        let (state, _) = watch::channel(Arc::new(AppState::default()));
        Self {
            state,
            poems: PoemService::new(backend.clone(), local),
            auth: AuthService::new(backend.clone(), backend),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<AppState> {
        self.state.borrow().clone()
    }

    /// Receive every committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.state.subscribe()
    }

    pub fn poems(&self) -> &PoemService {
        &self.poems
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    fn commit(&self, mutation: Mutation) {
        let next = reduce(&self.state(), mutation);
        self.state.send_replace(Arc::new(next));
    }

    fn begin(&self) {
        self.commit(Mutation::SetLoading(true));
        self.commit(Mutation::SetError(None));
    }

    fn finish<T>(&self, action: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!(action, "Action failed: {}", e);
            self.commit(Mutation::SetError(Some(user_message(e))));
        }
        self.commit(Mutation::SetLoading(false));
        result
    }

    fn require_user(&self) -> Result<User> {
        self.state().user.clone().ok_or(AppError::NotAuthenticated)
    }

    fn unwrap_fetched<T>(action: &str, fetched: Fetched<T>) -> T {
        if let Source::Local { cause } = fetched.source {
            tracing::warn!(action, ?cause, "Served from local storage");
        }
        fetched.into_value()
    }

    // Auth

    pub async fn login(&mut self, email: &str, password: &str) -> Result<User> {
        self.begin();
        let result = self.auth.sign_in(email, password).await;
        if let Ok(user) = &result {
            self.commit(Mutation::SetUser(Some(user.clone())));
        }
        self.finish("login", result)
    }

    pub async fn register(&mut self, email: &str, password: &str, username: &str) -> Result<SignUpOutcome> {
        self.begin();
        let result = self.auth.sign_up(email, password, username).await;
        if let Ok(outcome) = &result {
            if !outcome.requires_email_confirmation {
                self.commit(Mutation::SetUser(Some(outcome.user.clone())));
            }
        }
        self.finish("register", result)
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.begin();
        let result = self.auth.sign_out().await;
        if result.is_ok() {
            self.commit(Mutation::SetUser(None));
            self.commit(Mutation::SetFavorites(Vec::new()));
        }
        self.finish("logout", result)
    }

    pub async fn check_auth(&mut self) -> Option<User> {
        self.begin();
        let user = self.auth.current_user().await;
        self.commit(Mutation::SetUser(user.clone()));
        self.commit(Mutation::SetLoading(false));
        user
    }

    pub async fn reset_password(&mut self, email: &str) -> Result<()> {
        self.begin();
        let result = self.auth.reset_password(email).await;
        self.finish("reset_password", result)
    }

    // Poems

    pub async fn fetch_poems(&mut self) -> Result<Vec<Poem>> {
        self.begin();
        let result = self
            .poems
            .list_poems()
            .await
            .map(|fetched| Self::unwrap_fetched("fetch_poems", fetched));
        if let Ok(poems) = &result {
            self.commit(Mutation::SetPoems(poems.clone()));
        }
        self.finish("fetch_poems", result)
    }

    pub async fn fetch_poem(&mut self, poem_id: &str) -> Result<PoemDetail> {
        self.begin();
        let result = self.poems.get_poem_by_id(poem_id).await;
        if let Ok(detail) = &result {
            self.commit(Mutation::SetComments(detail.comments.clone()));
            self.commit(Mutation::SetCurrentPoem(Some(detail.clone())));
        }
        self.finish("fetch_poem", result)
    }

    pub async fn search_poems(&mut self, query: &str) -> Result<Vec<Poem>> {
        self.begin();
        let result = self.poems.search_poems(query).await;
        if let Ok(poems) = &result {
            self.commit(Mutation::SetSearchResults(Some(poems.clone())));
        }
        self.finish("search_poems", result)
    }

    pub fn clear_search(&mut self) {
        self.commit(Mutation::SetSearchResults(None));
    }

    pub async fn submit_poem(&mut self, poem: NewPoem) -> Result<Poem> {
        self.begin();
        let result = self
            .poems
            .submit_poem(poem)
            .await
            .map(|fetched| Self::unwrap_fetched("submit_poem", fetched));
        if let Ok(poem) = &result {
            self.commit(Mutation::AddPoem(poem.clone()));
        }
        self.finish("submit_poem", result)
    }

    // Favorites

    pub async fn fetch_favorites(&mut self) -> Result<Vec<Poem>> {
        self.begin();
        let result = match self.require_user() {
            Ok(user) => self
                .poems
                .get_user_favorites(&user.id)
                .await
                .map(|fetched| Self::unwrap_fetched("fetch_favorites", fetched)),
            Err(e) => Err(e),
        };
        if let Ok(favorites) = &result {
            self.commit(Mutation::SetFavorites(favorites.clone()));
        }
        self.finish("fetch_favorites", result)
    }

    pub async fn add_to_favorites(&mut self, poem_id: &str) -> Result<Favorite> {
        self.begin();
        let result = match self.require_user() {
            Ok(user) => self
                .poems
                .add_favorite(&user.id, poem_id)
                .await
                .map(|fetched| Self::unwrap_fetched("add_to_favorites", fetched)),
            Err(e) => Err(e),
        };
        if result.is_ok() {
            match self.resolve_poem(poem_id).await {
                Some(poem) => self.commit(Mutation::AddFavorite(poem)),
                None => tracing::warn!(%poem_id, "Favorited poem could not be loaded"),
            }
        }
        self.finish("add_to_favorites", result)
    }

    pub async fn remove_from_favorites(&mut self, poem_id: &str) -> Result<()> {
        self.begin();
        let result = match self.require_user() {
            Ok(user) => self
                .poems
                .remove_favorite(&user.id, poem_id)
                .await
                .map(|fetched| Self::unwrap_fetched("remove_from_favorites", fetched)),
            Err(e) => Err(e),
        };
        if result.is_ok() {
            self.commit(Mutation::RemoveFavorite(poem_id.to_string()));
        }
        self.finish("remove_from_favorites", result)
    }

    async fn resolve_poem(&self, poem_id: &str) -> Option<Poem> {
        if let Some(poem) = self.state().find_poem(poem_id) {
            return Some(poem.clone());
        }
        if let Ok(detail) = self.poems.get_poem_by_id(poem_id).await {
            return Some(detail.poem);
        }
        self.poems
            .local_submissions()
            .await
            .ok()?
            .into_iter()
            .find(|p| p.id == poem_id)
    }

    // Comments

    pub async fn fetch_comments(&mut self, poem_id: &str) -> Result<Vec<Comment>> {
        self.begin();
        let result = self.poems.get_poem_comments(poem_id).await;
        if let Ok(comments) = &result {
            self.commit(Mutation::SetComments(comments.clone()));
        }
        self.finish("fetch_comments", result)
    }

    pub async fn add_comment(&mut self, poem_id: &str, content: &str) -> Result<Comment> {
        self.begin();
        let result = match self.require_user() {
            Ok(user) => self.poems.add_comment(poem_id, &user.id, content).await,
            Err(e) => Err(e),
        };
        if let Ok(comment) = &result {
            self.commit(Mutation::AddComment(comment.clone()));
        }
        self.finish("add_comment", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{DataBackend, Failure, Operation};
    use crate::translate::Category;

    async fn app() -> (Arc<MemoryBackend>, App) {
        let backend = Arc::new(MemoryBackend::with_sample_poems().await);
        let app = App::with_backend(backend.clone(), LocalStore::in_memory());
        (backend, app)
    }

    async fn signed_in() -> (Arc<MemoryBackend>, App) {
        let (backend, mut app) = app().await;
        app.register("libai@tang.cn", "moonlight", "").await.unwrap();
        (backend, app)
    }

    #[tokio::test]
    async fn register_normalizes_username() {
        let (_, app) = signed_in().await;
        let state = app.state();
        assert!(state.is_authenticated());
        assert_eq!(state.user.as_ref().unwrap().username, "libai");
        assert!(!state.is_loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn fetch_poems_commits_and_clears_loading() {
        let (_, mut app) = app().await;
        let mut rx = app.subscribe();

        let poems = app.fetch_poems().await.unwrap();
        assert_eq!(poems.len(), 10);

        let state = rx.borrow_and_update().clone();
        assert_eq!(state.poems, poems);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn failed_action_records_translated_error() {
        let (backend, mut app) = app().await;
        backend.fail(Operation::SearchPoems, Failure::PolicyDenied).await;

        assert!(app.search_poems("月").await.is_err());
        let state = app.state();
        assert_eq!(state.error.as_deref(), Some(Category::Forbidden.message().as_str()));
        assert!(!state.is_loading);

        backend.recover().await;
        app.search_poems("月").await.unwrap();
        assert!(app.state().error.is_none());
    }

    #[tokio::test]
    async fn favorites_require_sign_in() {
        let (_, mut app) = app().await;
        let err = app.add_to_favorites("poem-000001").await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthenticated));
        assert_eq!(app.state().error.as_deref(), Some("认证失败，请重新登录"));
    }

    #[tokio::test]
    async fn favoriting_twice_keeps_one_entry() {
        let (backend, mut app) = signed_in().await;
        let poems = app.fetch_poems().await.unwrap();
        let poem_id = poems[3].id.clone();

        app.add_to_favorites(&poem_id).await.unwrap();
        app.add_to_favorites(&poem_id).await.unwrap();

        let state = app.state();
        assert_eq!(state.favorites.len(), 1);
        assert_eq!(state.favorites[0].id, poem_id);

        let user_id = state.user.as_ref().unwrap().id.clone();
        assert_eq!(backend.favorite_count(&user_id).await, 1);

        let fetched = app.fetch_favorites().await.unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[tokio::test]
    async fn favoriting_offline_still_updates_state() {
        let (backend, mut app) = signed_in().await;
        let poems = app.fetch_poems().await.unwrap();
        backend.fail_all(Failure::Unavailable).await;

        app.add_to_favorites(&poems[0].id).await.unwrap();
        app.add_to_favorites(&poems[0].id).await.unwrap();
        assert_eq!(app.state().favorites.len(), 1);

        app.remove_from_favorites(&poems[0].id).await.unwrap();
        assert!(app.state().favorites.is_empty());
        let user_id = app.state().user.as_ref().unwrap().id.clone();
        assert!(app.poems().local().favorites(&user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submitted_poem_appears_first() {
        let (backend, mut app) = signed_in().await;
        app.fetch_poems().await.unwrap();
        backend.fail(Operation::InsertPoem, Failure::PolicyDenied).await;

        let poem = app
            .submit_poem(NewPoem::new("夜泊", "张继", "唐代", "月落乌啼霜满天"))
            .await
            .unwrap();
        assert!(poem.is_local);
        assert_eq!(app.state().poems[0], poem);

        let reloaded = app.fetch_poems().await.unwrap();
        assert_eq!(reloaded[0], poem);
        assert_eq!(reloaded.len(), 11);
    }

    #[tokio::test]
    async fn comments_flow_into_current_poem() {
        let (backend, mut app) = signed_in().await;
        let poem_id = backend.list_poems().await.unwrap()[0].id.clone();

        app.fetch_poem(&poem_id).await.unwrap();
        let comment = app.add_comment(&poem_id, "千古绝唱").await.unwrap();
        assert!(comment.author.is_some());

        let state = app.state();
        assert_eq!(state.comments[0].id, comment.id);
        assert_eq!(state.current_poem.as_ref().unwrap().comments[0].id, comment.id);

        let comments = app.fetch_comments(&poem_id).await.unwrap();
        assert_eq!(comments.len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_user_and_favorites() {
        let (_, mut app) = signed_in().await;
        let poems = app.fetch_poems().await.unwrap();
        app.add_to_favorites(&poems[0].id).await.unwrap();

        app.logout().await.unwrap();
        let state = app.state();
        assert!(!state.is_authenticated());
        assert!(state.favorites.is_empty());
        assert!(app.check_auth().await.is_none());
    }

    #[tokio::test]
    async fn check_auth_restores_session_user() {
        let (_, mut app) = signed_in().await;
        let user = app.check_auth().await.unwrap();
        assert_eq!(user.email, "libai@tang.cn");
        assert_eq!(app.state().user, Some(user));
    }

    #[tokio::test]
    async fn unknown_poem_detail_reports_not_found() {
        let (_, mut app) = app().await;
        assert!(app.fetch_poem("nope").await.is_err());
        assert_eq!(app.state().error.as_deref(), Some("请求的资源不存在"));
        assert!(app.state().current_poem.is_none());
    }
}
