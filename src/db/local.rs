use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{NewPoem, Poem};

/// Keys under which fallback data is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Favorites(String),
    Submissions,
}

impl StoreKey {
    pub fn favorites(user_id: &str) -> Self {
        StoreKey::Favorites(user_id.to_string())
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Favorites(user_id) => write!(f, "favorites:{user_id}"),
            StoreKey::Submissions => f.write_str("submissions:local"),
        }
    }
}

/// Persistent medium holding one JSON document per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>>;
    async fn put(&self, key: &StoreKey, value: String) -> Result<()>;
}

/// Volatile medium, also able to simulate an unavailable store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::OperationFailed("local store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        self.check()?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &StoreKey, value: String) -> Result<()> {
        self.check()?;
        self.entries.lock().await.insert(key.clone(), value);
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &StoreKey, value: String) -> Result<()> {
        (**self).put(key, value).await
    }
}

/// Typed view over the fallback medium. Every storage failure surfaces as
/// `AppError::OperationFailed`.
#[derive(Clone)]
pub struct LocalStore {
    medium: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(medium: impl KeyValueStore + 'static) -> Self {
        Self {
            medium: Arc::new(medium),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    async fn read<T: DeserializeOwned>(&self, key: &StoreKey) -> Result<Vec<T>> {
        let raw = self.medium.get(key).await.map_err(operation_failed)?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(%key, "Discarding unreadable local entry: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &StoreKey, items: &[T]) -> Result<()> {
        let raw = serde_json::to_string(items).map_err(|e| AppError::OperationFailed(e.to_string()))?;
        self.medium.put(key, raw).await.map_err(operation_failed)
    }

    pub async fn favorites(&self, user_id: &str) -> Result<Vec<String>> {
        self.read(&StoreKey::favorites(user_id)).await
    }

    pub async fn put_favorites(&self, user_id: &str, poem_ids: &[String]) -> Result<()> {
        self.write(&StoreKey::favorites(user_id), poem_ids).await
    }

    /// Append unless already present. Returns whether the list changed.
    pub async fn add_favorite(&self, user_id: &str, poem_id: &str) -> Result<bool> {
        let mut ids = self.favorites(user_id).await?;
        if ids.iter().any(|id| id == poem_id) {
            return Ok(false);
        }
        ids.push(poem_id.to_string());
        self.put_favorites(user_id, &ids).await?;
        Ok(true)
    }

    pub async fn remove_favorite(&self, user_id: &str, poem_id: &str) -> Result<()> {
        let mut ids = self.favorites(user_id).await?;
        ids.retain(|id| id != poem_id);
        self.put_favorites(user_id, &ids).await
    }

    pub async fn submissions(&self) -> Result<Vec<Poem>> {
        self.read(&StoreKey::Submissions).await
    }

    pub async fn put_submissions(&self, poems: &[Poem]) -> Result<()> {
        self.write(&StoreKey::Submissions, poems).await
    }

    /// Store a submission under a fresh millisecond-timestamp id, strictly
    /// greater than any local id issued before.
    pub async fn add_submission(&self, poem: NewPoem, now: DateTime<Utc>) -> Result<Poem> {
        let mut poems = self.submissions().await?;
        let newest = poems
            .iter()
            .filter_map(|p| p.id.parse::<i64>().ok())
            .max()
            .unwrap_or(i64::MIN);
        let id = now.timestamp_millis().max(newest.saturating_add(1));

        let poem = poem.into_local(id.to_string(), now);
        poems.push(poem.clone());
        self.put_submissions(&poems).await?;

        tracing::info!(id = %poem.id, title = %poem.title, "Saved submission locally");
        Ok(poem)
    }
}

fn operation_failed(e: AppError) -> AppError {
    match e {
        AppError::OperationFailed(_) => e,
        other => AppError::OperationFailed(other.to_string()),
    }
}
