use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{ProfileUpdate, SignUpOutcome, User};
use crate::services::{AuthBackend, DataBackend};
use crate::translate::translate;

/// Account operations on top of the backend's auth endpoints.
#[derive(Clone)]
pub struct AuthService {
    auth: Arc<dyn AuthBackend>,
    data: Arc<dyn DataBackend>,
}

impl AuthService {
    pub fn new(auth: Arc<dyn AuthBackend>, data: Arc<dyn DataBackend>) -> Self {
        Self { auth, data }
    }

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<SignUpOutcome> {
        let response = self
            .auth
            .sign_up(email, password, username)
            .await
            .map_err(|e| {
                let category = translate(&e);
                tracing::error!(%email, ?category, "Sign-up failed: {}", e);
                e
            })?;

        let user = response
            .session
            .as_ref()
            .map(|s| &s.user)
            .or(response.user.as_ref())
            .map(User::from)
            .ok_or_else(|| AppError::Remote {
                status: None,
                code: None,
                message: "sign-up returned no user".into(),
            })?;

        Ok(SignUpOutcome {
            user,
            requires_email_confirmation: response.session.is_none(),
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        match self.auth.sign_in(email, password).await {
            Ok(session) => Ok(User::from(&session.user)),
            Err(e) if e.to_string().contains("Email not confirmed") => {
                tracing::warn!(%email, "Sign-in before email confirmation");
                Err(AppError::EmailNotConfirmed)
            }
            Err(e) => {
                tracing::error!(%email, "Sign-in failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await.map_err(|e| {
            tracing::error!("Sign-out failed: {}", e);
            e
        })
    }

    /// The signed-in user. Lookup failures count as signed out.
    pub async fn current_user(&self) -> Option<User> {
        match self.auth.current_user().await {
            Ok(user) => user.as_ref().map(User::from),
            Err(e) => {
                tracing::warn!("Failed to load current user: {}", e);
                None
            }
        }
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        self.auth.reset_password(email).await.map_err(|e| {
            tracing::error!(%email, "Password reset failed: {}", e);
            e
        })
    }

    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<()> {
        self.data.update_profile(user_id, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Failure, MemoryBackend, Operation};

    fn service(backend: &Arc<MemoryBackend>) -> AuthService {
        AuthService::new(backend.clone(), backend.clone())
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let backend = Arc::new(MemoryBackend::new());
        let auth = service(&backend);

        let outcome = auth.sign_up("libai@tang.cn", "moonlight", "青莲").await.unwrap();
        assert!(!outcome.requires_email_confirmation);
        assert_eq!(outcome.user.username, "青莲");

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().await.is_none());

        let user = auth.sign_in("libai@tang.cn", "moonlight").await.unwrap();
        assert_eq!(user, outcome.user);
        assert_eq!(auth.current_user().await, Some(user));
    }

    #[tokio::test]
    async fn unconfirmed_email_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.require_email_confirmation(true).await;
        let auth = service(&backend);

        let outcome = auth.sign_up("dufu@tang.cn", "autumn", "").await.unwrap();
        assert!(outcome.requires_email_confirmation);
        assert_eq!(outcome.user.username, "dufu");

        let err = auth.sign_in("dufu@tang.cn", "autumn").await.unwrap_err();
        assert!(matches!(err, AppError::EmailNotConfirmed));

        backend.confirm_email("dufu@tang.cn").await;
        assert!(auth.sign_in("dufu@tang.cn", "autumn").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_password_propagates() {
        let backend = Arc::new(MemoryBackend::new());
        let auth = service(&backend);
        auth.sign_up("wangwei@tang.cn", "mountain", "摩诘").await.unwrap();

        let err = auth.sign_in("wangwei@tang.cn", "river").await.unwrap_err();
        assert_eq!(err.code(), Some("invalid_credentials"));
    }

    #[tokio::test]
    async fn profile_update_shows_on_comments() {
        let backend = Arc::new(MemoryBackend::new());
        let auth = service(&backend);
        let user = auth.sign_up("liqingzhao@song.cn", "plum", "易安").await.unwrap().user;

        let update = ProfileUpdate {
            username: Some("易安居士".into()),
            avatar_url: None,
            bio: Some("婉约词宗".into()),
        };
        auth.update_profile(&user.id, &update).await.unwrap();

        let comment = backend
            .insert_comment(&crate::models::NewComment {
                poem_id: "p1".into(),
                user_id: user.id.clone(),
                content: "好".into(),
            })
            .await
            .unwrap();
        let author = comment.author.unwrap();
        assert_eq!(author.username.as_deref(), Some("易安居士"));
        assert!(author.avatar_url.is_none());
        assert_eq!(author.bio.as_deref(), Some("婉约词宗"));
    }

    #[tokio::test]
    async fn current_user_swallows_backend_errors() {
        let backend = Arc::new(MemoryBackend::new());
        let auth = service(&backend);
        auth.sign_up("sushi@song.cn", "river", "东坡").await.unwrap();

        backend.fail(Operation::Auth, Failure::Unavailable).await;
        assert!(auth.current_user().await.is_none());
    }
}
