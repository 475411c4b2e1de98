use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    sort_newest_first, AuthUser, Comment, Favorite, NewComment, NewPoem, Poem, PoemDetail,
    Profile, ProfileUpdate, Session,
};

use super::backend::{AuthBackend, DataBackend, SignUpResponse};

const SAMPLE_POEMS: &[(&str, &str, &str, &str)] = &[
    ("静夜思", "李白", "唐代", "床前明月光，疑是地上霜。举头望明月，低头思故乡。"),
    ("春晓", "孟浩然", "唐代", "春眠不觉晓，处处闻啼鸟。夜来风雨声，花落知多少。"),
    ("登鹳雀楼", "王之涣", "唐代", "白日依山尽，黄河入海流。欲穷千里目，更上一层楼。"),
    ("望庐山瀑布", "李白", "唐代", "日照香炉生紫烟，遥看瀑布挂前川。飞流直下三千尺，疑是银河落九天。"),
    ("相思", "王维", "唐代", "红豆生南国，春来发几枝。愿君多采撷，此物最相思。"),
    ("江雪", "柳宗元", "唐代", "千山鸟飞绝，万径人踪灭。孤舟蓑笠翁，独钓寒江雪。"),
    ("悯农", "李绅", "唐代", "锄禾日当午，汗滴禾下土。谁知盘中餐，粒粒皆辛苦。"),
    ("游子吟", "孟郊", "唐代", "慈母手中线，游子身上衣。临行密密缝，意恐迟迟归。谁言寸草心，报得三春晖。"),
    ("水调歌头", "苏轼", "宋代", "明月几时有？把酒问青天。不知天上宫阙，今夕是何年。我欲乘风归去，又恐琼楼玉宇，高处不胜寒。起舞弄清影，何似在人间。"),
    ("声声慢", "李清照", "宋代", "寻寻觅觅，冷冷清清，凄凄惨惨戚戚。乍暖还寒时候，最难将息。三杯两盏淡酒，怎敌他、晚来风急？雁过也，正伤心，却是旧时相识。"),
];

/// The ten classical poems the hosted database is seeded with.
pub fn sample_poems() -> Vec<NewPoem> {
    SAMPLE_POEMS
        .iter()
        .map(|(title, author, dynasty, content)| NewPoem::new(*title, *author, *dynasty, *content))
        .collect()
}

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListPoems,
    PoemDetail,
    SearchPoems,
    PoemsByIds,
    PoemsByDynasty,
    PopularPoems,
    InsertPoem,
    InsertFavorite,
    FindFavorite,
    DeleteFavorite,
    FavoriteIds,
    InsertComment,
    PoemComments,
    UpdateProfile,
    Auth,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::ListPoems,
        Operation::PoemDetail,
        Operation::SearchPoems,
        Operation::PoemsByIds,
        Operation::PoemsByDynasty,
        Operation::PopularPoems,
        Operation::InsertPoem,
        Operation::InsertFavorite,
        Operation::FindFavorite,
        Operation::DeleteFavorite,
        Operation::FavoriteIds,
        Operation::InsertComment,
        Operation::PoemComments,
        Operation::UpdateProfile,
        Operation::Auth,
    ];
}

/// Failure modes the hosted backend is known to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    PolicyDenied,
    RelationMissing,
    Unavailable,
}

impl Failure {
    fn to_error(self, table: &str) -> AppError {
        match self {
            Failure::PolicyDenied => AppError::from_remote(
                Some(401),
                Some("42501".into()),
                format!("new row violates row-level security policy for table \"{table}\""),
            ),
            Failure::RelationMissing => AppError::from_remote(
                Some(404),
                Some("42P01".into()),
                format!("relation \"public.{table}\" does not exist"),
            ),
            Failure::Unavailable => AppError::from_remote(Some(503), None, "Service Unavailable"),
        }
    }
}

struct Account {
    password: String,
    user: AuthUser,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    clock: Option<DateTime<Utc>>,
    poems: Vec<Poem>,
    favorites: Vec<Favorite>,
    comments: Vec<Comment>,
    profiles: HashMap<String, Profile>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    require_confirmation: bool,
    confirmed: HashSet<String>,
    failures: HashMap<Operation, Failure>,
}

impl Inner {
    fn issue_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }

    /// Timestamps strictly increase so newest-first ordering is deterministic.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = match self.clock {
            Some(last) => (last + Duration::milliseconds(1)).max(Utc::now()),
            None => Utc::now(),
        };
        self.clock = Some(now);
        now
    }

    fn check(&self, op: Operation, table: &str) -> Result<()> {
        match self.failures.get(&op) {
            Some(failure) => Err(failure.to_error(table)),
            None => Ok(()),
        }
    }

    fn newest_first(&self, filter: impl Fn(&Poem) -> bool) -> Vec<Poem> {
        let mut poems: Vec<Poem> = self.poems.iter().filter(|p| filter(*p)).cloned().collect();
        poems.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        poems
    }

    fn with_author(&self, comment: &Comment) -> Comment {
        let mut comment = comment.clone();
        comment.author = self.profiles.get(&comment.user_id).cloned();
        comment
    }
}

/// In-process backend holding its tables in memory. Used for offline runs
/// and tests; individual operations can be told to fail the way the hosted
/// backend does.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend preloaded with the sample poems.
    pub async fn with_sample_poems() -> Self {
        let backend = Self::new();
        for poem in sample_poems() {
            backend.seed_poem(poem).await;
        }
        backend
    }

    pub async fn seed_poem(&self, poem: NewPoem) -> Poem {
        let mut inner = self.inner.lock().await;
        let now = inner.tick();
        let id = inner.issue_id("poem");
        let poem = Poem {
            is_local: false,
            ..poem.into_local(id, now)
        };
        inner.poems.push(poem.clone());
        poem
    }

    pub async fn fail(&self, op: Operation, failure: Failure) {
        self.inner.lock().await.failures.insert(op, failure);
    }

    pub async fn fail_all(&self, failure: Failure) {
        let mut inner = self.inner.lock().await;
        for op in Operation::ALL {
            inner.failures.insert(op, failure);
        }
    }

    pub async fn recover(&self) {
        self.inner.lock().await.failures.clear();
    }

    /// New sign-ups get no session until their email is confirmed.
    pub async fn require_email_confirmation(&self, required: bool) {
        self.inner.lock().await.require_confirmation = required;
    }

    pub async fn confirm_email(&self, email: &str) {
        self.inner.lock().await.confirmed.insert(email.to_string());
    }

    pub async fn favorite_count(&self, user_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.favorites.iter().filter(|f| f.user_id == user_id).count()
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn list_poems(&self) -> Result<Vec<Poem>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::ListPoems, "poems")?;
        Ok(inner.newest_first(|_| true))
    }

    async fn poem_detail(&self, id: &str) -> Result<PoemDetail> {
        let inner = self.inner.lock().await;
        inner.check(Operation::PoemDetail, "poems")?;
        let poem = inner
            .poems
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| {
                AppError::from_remote(
                    Some(406),
                    Some("PGRST116".into()),
                    "JSON object requested, multiple (or no) rows returned",
                )
            })?;
        let mut comments: Vec<Comment> = inner
            .comments
            .iter()
            .filter(|c| c.poem_id == id)
            .map(|c| inner.with_author(c))
            .collect();
        sort_newest_first(&mut comments);
        Ok(PoemDetail { poem, comments })
    }

    async fn search_poems(&self, query: &str) -> Result<Vec<Poem>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::SearchPoems, "poems")?;
        let needle = query.to_lowercase();
        Ok(inner.newest_first(|p| {
            [&p.title, &p.content, &p.author]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        }))
    }

    async fn poems_by_ids(&self, ids: &[String]) -> Result<Vec<Poem>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::PoemsByIds, "poems")?;
        Ok(inner.newest_first(|p| ids.contains(&p.id)))
    }

    async fn poems_by_dynasty(&self, dynasty: &str) -> Result<Vec<Poem>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::PoemsByDynasty, "poems")?;
        Ok(inner.newest_first(|p| p.dynasty == dynasty))
    }

    async fn popular_poems(&self, limit: usize) -> Result<Vec<Poem>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::PopularPoems, "poems")?;
        let count = |poem: &Poem| inner.favorites.iter().filter(|f| f.poem_id == poem.id).count();
        let mut poems = inner.newest_first(|_| true);
        poems.sort_by_key(|p| std::cmp::Reverse(count(p)));
        poems.truncate(limit);
        Ok(poems)
    }

    async fn insert_poem(&self, poem: &NewPoem, now: DateTime<Utc>) -> Result<Poem> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::InsertPoem, "poems")?;
        let id = inner.issue_id("poem");
        let poem = Poem {
            is_local: false,
            ..poem.clone().into_local(id, now)
        };
        inner.poems.push(poem.clone());
        Ok(poem)
    }

    async fn insert_favorite(&self, user_id: &str, poem_id: &str) -> Result<Favorite> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::InsertFavorite, "favorites")?;
        if inner
            .favorites
            .iter()
            .any(|f| f.user_id == user_id && f.poem_id == poem_id)
        {
            return Err(AppError::from_remote(
                Some(409),
                Some("23505".into()),
                "duplicate key value violates unique constraint \"favorites_user_id_poem_id_key\"",
            ));
        }
        let now = inner.tick();
        let favorite = Favorite {
            id: inner.issue_id("fav"),
            user_id: user_id.to_string(),
            poem_id: poem_id.to_string(),
            created_at: now,
        };
        inner.favorites.push(favorite.clone());
        Ok(favorite)
    }

    async fn find_favorite(&self, user_id: &str, poem_id: &str) -> Result<Option<Favorite>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::FindFavorite, "favorites")?;
        Ok(inner
            .favorites
            .iter()
            .find(|f| f.user_id == user_id && f.poem_id == poem_id)
            .cloned())
    }

    async fn delete_favorite(&self, user_id: &str, poem_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::DeleteFavorite, "favorites")?;
        inner
            .favorites
            .retain(|f| !(f.user_id == user_id && f.poem_id == poem_id));
        Ok(())
    }

    async fn favorite_poem_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::FavoriteIds, "favorites")?;
        let mut favorites: Vec<&Favorite> =
            inner.favorites.iter().filter(|f| f.user_id == user_id).collect();
        favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(favorites.into_iter().map(|f| f.poem_id.clone()).collect())
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::InsertComment, "comments")?;
        let now = inner.tick();
        let stored = Comment {
            id: inner.issue_id("comment"),
            poem_id: comment.poem_id.clone(),
            user_id: comment.user_id.clone(),
            content: comment.content.clone(),
            created_at: now,
            author: None,
        };
        inner.comments.push(stored.clone());
        Ok(inner.with_author(&stored))
    }

    async fn poem_comments(&self, poem_id: &str) -> Result<Vec<Comment>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::PoemComments, "comments")?;
        let mut comments: Vec<Comment> = inner
            .comments
            .iter()
            .filter(|c| c.poem_id == poem_id)
            .map(|c| inner.with_author(c))
            .collect();
        sort_newest_first(&mut comments);
        Ok(comments)
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::UpdateProfile, "user_profiles")?;
        let profile = inner.profiles.entry(user_id.to_string()).or_default();
        if let Some(username) = &update.username {
            profile.username = Some(username.clone());
        }
        if let Some(avatar_url) = &update.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
        if let Some(bio) = &update.bio {
            profile.bio = Some(bio.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<SignUpResponse> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::Auth, "users")?;
        if inner.accounts.contains_key(email) {
            return Err(AppError::from_remote(
                Some(422),
                Some("user_already_exists".into()),
                "User already registered",
            ));
        }

        let mut metadata = Map::new();
        metadata.insert("username".into(), Value::String(username.to_string()));
        let user = AuthUser {
            id: inner.issue_id("user"),
            email: Some(email.to_string()),
            user_metadata: metadata,
        };
        inner.profiles.insert(
            user.id.clone(),
            Profile {
                username: Some(username.to_string()),
                avatar_url: None,
                bio: None,
            },
        );
        inner.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );

        if inner.require_confirmation {
            return Ok(SignUpResponse {
                user: Some(user),
                session: None,
            });
        }

        inner.confirmed.insert(email.to_string());
        let session = Session {
            access_token: inner.issue_id("token"),
            refresh_token: None,
            user: user.clone(),
        };
        inner.session = Some(session.clone());
        Ok(SignUpResponse {
            user: Some(user),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::Auth, "users")?;
        let user = match inner.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => {
                return Err(AppError::from_remote(
                    Some(400),
                    Some("invalid_credentials".into()),
                    "Invalid login credentials",
                ))
            }
        };
        if !inner.confirmed.contains(email) {
            return Err(AppError::from_remote(
                Some(400),
                Some("email_not_confirmed".into()),
                "Email not confirmed",
            ));
        }

        let session = Session {
            access_token: inner.issue_id("token"),
            refresh_token: None,
            user,
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check(Operation::Auth, "users")?;
        inner.session = None;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        let inner = self.inner.lock().await;
        inner.check(Operation::Auth, "users")?;
        Ok(inner.session.as_ref().map(|s| s.user.clone()))
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.check(Operation::Auth, "users")?;
        tracing::debug!(%email, "Password reset requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn lists_newest_first() {
        let backend = MemoryBackend::with_sample_poems().await;
        let poems = backend.list_poems().await.unwrap();
        assert_eq!(poems.len(), 10);
        assert_eq!(poems.first().unwrap().title, "声声慢");
        assert_eq!(poems.last().unwrap().title, "静夜思");
    }

    #[tokio::test]
    async fn duplicate_favorite_is_unique_violation() {
        let backend = MemoryBackend::new();
        backend.insert_favorite("u1", "p1").await.unwrap();
        let err = backend.insert_favorite("u1", "p1").await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(backend.favorite_count("u1").await, 1);
    }

    #[tokio::test]
    async fn injected_failures_match_backend_errors() {
        let backend = MemoryBackend::new();
        backend.fail(Operation::InsertPoem, Failure::PolicyDenied).await;
        backend.fail(Operation::ListPoems, Failure::RelationMissing).await;

        let err = backend
            .insert_poem(&NewPoem::new("a", "b", "c", "d"), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyDenied);
        assert_eq!(backend.list_poems().await.unwrap_err().kind(), ErrorKind::RelationMissing);

        backend.recover().await;
        assert!(backend.list_poems().await.is_ok());
    }

    #[tokio::test]
    async fn popular_poems_rank_by_favorites() {
        let backend = MemoryBackend::with_sample_poems().await;
        let poems = backend.list_poems().await.unwrap();
        let target = &poems[5].id;
        backend.insert_favorite("u1", target).await.unwrap();
        backend.insert_favorite("u2", target).await.unwrap();

        let popular = backend.popular_poems(3).await.unwrap();
        assert_eq!(popular.len(), 3);
        assert_eq!(&popular[0].id, target);
    }
}
