use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    sort_newest_first, AuthUser, Comment, Favorite, NewComment, NewPoem, Poem, PoemDetail,
    ProfileUpdate, Session,
};

use super::backend::{AuthBackend, DataBackend, SignUpResponse};

const REST_PATH: &str = "rest/v1/";
const AUTH_PATH: &str = "auth/v1/";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const POEM_WITH_COMMENTS: &str = "*,comments(*,author:user_profiles(username,avatar_url,bio))";
const COMMENT_WITH_AUTHOR: &str = "*,author:user_profiles(username,avatar_url,bio)";
const NEWEST_FIRST: &str = "created_at.desc";

#[derive(Debug, Serialize)]
struct InsertPoemRequest<'a> {
    title: &'a str,
    author: &'a str,
    dynasty: &'a str,
    content: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct InsertFavoriteRequest<'a> {
    user_id: &'a str,
    poem_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct FavoriteIdRow {
    poem_id: String,
}

#[derive(Debug, Deserialize)]
struct RankedPoemRow {
    #[serde(flatten)]
    poem: Poem,
    #[serde(default)]
    favorites: Vec<CountRow>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

/// Client for a Supabase-style backend: PostgREST tables under `/rest/v1`
/// and GoTrue auth under `/auth/v1`.
pub struct SupabaseClient {
    client: Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: String, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("poetry-shelf/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url,
            anon_key,
            session: RwLock::new(None),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        Ok(self.base_url.join(REST_PATH)?.join(table)?)
    }

    fn auth_url(&self, endpoint: &str) -> Result<Url> {
        Ok(self.base_url.join(AUTH_PATH)?.join(endpoint)?)
    }

    /// Requests carry the user's access token once signed in, the anon key
    /// before that.
    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());

        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn table(&self, method: Method, table: &str) -> Result<RequestBuilder> {
        let url = self.table_url(table)?;
        Ok(self.request(method, url).await)
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn insert<B, T>(&self, table: &str, select: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self
            .table(Method::POST, table)
            .await?
            .header("Prefer", "return=representation")
            .query(&[("select", select)])
            .json(body);

        let rows: Vec<T> = self.fetch(builder).await?;
        rows.into_iter().next().ok_or_else(|| AppError::Remote {
            status: None,
            code: None,
            message: format!("insert into {table} returned no rows"),
        })
    }
}

#[async_trait]
impl DataBackend for SupabaseClient {
    async fn list_poems(&self) -> Result<Vec<Poem>> {
        let builder = self
            .table(Method::GET, "poems")
            .await?
            .query(&[("select", "*"), ("order", NEWEST_FIRST)]);
        let poems: Vec<Poem> = self.fetch(builder).await?;
        tracing::debug!("Fetched {} poems", poems.len());
        Ok(poems)
    }

    async fn poem_detail(&self, id: &str) -> Result<PoemDetail> {
        let builder = self
            .table(Method::GET, "poems")
            .await?
            .header("Accept", SINGLE_OBJECT)
            .query(&[("select", POEM_WITH_COMMENTS.to_string()), ("id", eq(id))]);
        let mut detail: PoemDetail = self.fetch(builder).await?;
        sort_newest_first(&mut detail.comments);
        Ok(detail)
    }

    async fn search_poems(&self, query: &str) -> Result<Vec<Poem>> {
        let builder = self.table(Method::GET, "poems").await?.query(&[
            ("select", "*".to_string()),
            ("or", ilike_any(&["title", "content", "author"], query)),
            ("order", NEWEST_FIRST.to_string()),
        ]);
        self.fetch(builder).await
    }

    async fn poems_by_ids(&self, ids: &[String]) -> Result<Vec<Poem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let builder = self
            .table(Method::GET, "poems")
            .await?
            .query(&[("select", "*".to_string()), ("id", in_list(ids))]);
        self.fetch(builder).await
    }

    async fn poems_by_dynasty(&self, dynasty: &str) -> Result<Vec<Poem>> {
        let builder = self.table(Method::GET, "poems").await?.query(&[
            ("select", "*".to_string()),
            ("dynasty", eq(dynasty)),
            ("order", NEWEST_FIRST.to_string()),
        ]);
        self.fetch(builder).await
    }

    async fn popular_poems(&self, limit: usize) -> Result<Vec<Poem>> {
        let builder = self
            .table(Method::GET, "poems")
            .await?
            .query(&[("select", "*,favorites(count)"), ("order", NEWEST_FIRST)]);
        let rows: Vec<RankedPoemRow> = self.fetch(builder).await?;
        Ok(rank_by_favorites(rows, limit))
    }

    async fn insert_poem(&self, poem: &NewPoem, now: DateTime<Utc>) -> Result<Poem> {
        let request = InsertPoemRequest {
            title: &poem.title,
            author: &poem.author,
            dynasty: &poem.dynasty,
            content: &poem.content,
            created_at: now,
            updated_at: now,
        };
        self.insert("poems", "*", &request).await
    }

    async fn insert_favorite(&self, user_id: &str, poem_id: &str) -> Result<Favorite> {
        let request = InsertFavoriteRequest { user_id, poem_id };
        self.insert("favorites", "*", &request).await
    }

    async fn find_favorite(&self, user_id: &str, poem_id: &str) -> Result<Option<Favorite>> {
        let builder = self.table(Method::GET, "favorites").await?.query(&[
            ("select", "*".to_string()),
            ("user_id", eq(user_id)),
            ("poem_id", eq(poem_id)),
        ]);
        let rows: Vec<Favorite> = self.fetch(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_favorite(&self, user_id: &str, poem_id: &str) -> Result<()> {
        let builder = self
            .table(Method::DELETE, "favorites")
            .await?
            .query(&[("user_id", eq(user_id)), ("poem_id", eq(poem_id))]);
        check(builder.send().await?).await?;
        Ok(())
    }

    async fn favorite_poem_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let builder = self.table(Method::GET, "favorites").await?.query(&[
            ("select", "poem_id".to_string()),
            ("user_id", eq(user_id)),
            ("order", NEWEST_FIRST.to_string()),
        ]);
        let rows: Vec<FavoriteIdRow> = self.fetch(builder).await?;
        Ok(rows.into_iter().map(|row| row.poem_id).collect())
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        self.insert("comments", COMMENT_WITH_AUTHOR, comment).await
    }

    async fn poem_comments(&self, poem_id: &str) -> Result<Vec<Comment>> {
        let builder = self.table(Method::GET, "comments").await?.query(&[
            ("select", COMMENT_WITH_AUTHOR.to_string()),
            ("poem_id", eq(poem_id)),
            ("order", NEWEST_FIRST.to_string()),
        ]);
        self.fetch(builder).await
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<()> {
        let builder = self
            .table(Method::PATCH, "user_profiles")
            .await?
            .query(&[("id", eq(user_id))])
            .json(update);
        check(builder.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<SignUpResponse> {
        let url = self.auth_url("signup")?;
        let builder = self.request(Method::POST, url).await.json(&json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        }));
        let value: Value = self.fetch(builder).await?;
        let response = parse_sign_up(value)?;

        if let Some(session) = &response.session {
            *self.session.write().await = Some(session.clone());
        }
        Ok(response)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let mut url = self.auth_url("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let builder = self
            .request(Method::POST, url)
            .await
            .json(&CredentialsRequest { email, password });
        let session: Session = self.fetch(builder).await?;

        *self.session.write().await = Some(session.clone());
        tracing::debug!(user = %session.user.id, "Signed in");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.session.read().await.is_none() {
            return Ok(());
        }
        let url = self.auth_url("logout")?;
        let result = self.request(Method::POST, url).await.send().await;

        // The local session is dropped even when the server call fails.
        *self.session.write().await = None;
        check(result?).await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        if self.session.read().await.is_none() {
            return Ok(None);
        }
        let url = self.auth_url("user")?;
        let builder = self.request(Method::GET, url).await;
        let user: AuthUser = self.fetch(builder).await?;
        Ok(Some(user))
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        let url = self.auth_url("recover")?;
        let builder = self
            .request(Method::POST, url)
            .await
            .json(&json!({ "email": email }));
        check(builder.send().await?).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    Err(remote_error(status.as_u16(), &body))
}

/// Decode a PostgREST (`code`, `message`) or GoTrue (`error_code`, `msg`,
/// `error_description`) error body.
fn remote_error(status: u16, body: &str) -> AppError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let code = ["code", "error_code"]
        .iter()
        .find_map(|key| match value.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });

    let message = ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });

    AppError::from_remote(Some(status), code, message)
}

fn parse_sign_up(value: Value) -> Result<SignUpResponse> {
    if value.get("access_token").is_some() {
        let session: Session = serde_json::from_value(value)?;
        return Ok(SignUpResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    let user = if let Some(user) = value.get("user").filter(|u| !u.is_null()) {
        Some(serde_json::from_value(user.clone())?)
    } else if value.get("id").is_some() {
        Some(serde_json::from_value(value)?)
    } else {
        None
    };
    Ok(SignUpResponse {
        user,
        session: None,
    })
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

/// Quote a value for use inside PostgREST `in` lists and logical filters.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn in_list(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("in.({})", items.join(","))
}

fn ilike_any(columns: &[&str], query: &str) -> String {
    let pattern = quote(&format!("*{query}*"));
    let clauses: Vec<String> = columns
        .iter()
        .map(|column| format!("{column}.ilike.{pattern}"))
        .collect();
    format!("({})", clauses.join(","))
}

fn rank_by_favorites(rows: Vec<RankedPoemRow>, limit: usize) -> Vec<Poem> {
    let mut ranked: Vec<(i64, Poem)> = rows
        .into_iter()
        .map(|row| {
            let count: i64 = row.favorites.iter().map(|c| c.count).sum();
            (count, row.poem)
        })
        .collect();
    // Stable sort keeps newest-first among equally popular poems.
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(limit).map(|(_, poem)| poem).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn client() -> SupabaseClient {
        SupabaseClient::new(
            "https://example.supabase.co",
            "anon".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn builds_endpoint_urls() {
        let client = client();
        assert_eq!(
            client.table_url("poems").unwrap().as_str(),
            "https://example.supabase.co/rest/v1/poems"
        );
        assert_eq!(
            client.auth_url("token").unwrap().as_str(),
            "https://example.supabase.co/auth/v1/token"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let client = SupabaseClient::new(
            "http://localhost:54321/proxy",
            "anon".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.table_url("favorites").unwrap().as_str(),
            "http://localhost:54321/proxy/rest/v1/favorites"
        );
    }

    #[test]
    fn builds_search_filter() {
        assert_eq!(
            ilike_any(&["title", "content", "author"], "静夜"),
            r#"(title.ilike."*静夜*",content.ilike."*静夜*",author.ilike."*静夜*")"#
        );
        assert_eq!(ilike_any(&["title"], r#"a"b,c"#), r#"(title.ilike."*a\"b,c*")"#);
    }

    #[test]
    fn builds_in_filter() {
        let ids = vec!["a1".to_string(), "b2".to_string()];
        assert_eq!(in_list(&ids), r#"in.("a1","b2")"#);
    }

    #[test]
    fn decodes_postgrest_errors() {
        let body = r#"{"code":"42501","details":null,"hint":null,"message":"new row violates row-level security policy for table \"favorites\""}"#;
        assert_eq!(remote_error(401, body).kind(), ErrorKind::PolicyDenied);

        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        let err = remote_error(409, body);
        assert!(err.is_unique_violation());
    }

    #[test]
    fn decodes_gotrue_errors() {
        let body = r#"{"code":400,"error_code":"email_not_confirmed","msg":"Email not confirmed"}"#;
        let err = remote_error(400, body);
        assert_eq!(err.code(), Some("400"));
        assert_eq!(err.to_string(), "Backend error: Email not confirmed");

        let err = remote_error(502, "");
        assert_eq!(err.to_string(), "Backend error: HTTP 502");
    }

    #[test]
    fn sign_up_without_session_needs_confirmation() {
        let value = json!({"id": "u1", "email": "a@b.c", "user_metadata": {"username": "a"}});
        let response = parse_sign_up(value).unwrap();
        assert!(response.session.is_none());
        assert_eq!(response.user.unwrap().id, "u1");

        let value = json!({
            "access_token": "t",
            "refresh_token": "r",
            "user": {"id": "u2", "email": "x@y.z"}
        });
        let response = parse_sign_up(value).unwrap();
        assert!(response.session.is_some());
        assert_eq!(response.user.unwrap().id, "u2");
    }

    #[test]
    fn ranks_by_favorite_count() {
        let now = Utc::now();
        let row = |id: &str, count: i64| RankedPoemRow {
            poem: NewPoem::new(id, "a", "唐代", "c").into_local(id.into(), now),
            favorites: vec![CountRow { count }],
        };
        let ranked = rank_by_favorites(vec![row("x", 1), row("y", 5), row("z", 1)], 2);
        let ids: Vec<_> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["y", "x"]);
    }

    #[tokio::test]
    async fn anonymous_session_has_no_user() {
        let client = client();
        assert!(client.current_user().await.unwrap().is_none());
        assert!(client.sign_out().await.is_ok());
    }
}
