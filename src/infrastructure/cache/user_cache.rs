//! User Profile Cache
//!
//! Caches the sender metadata the notification fan-out needs per event, so a
//! burst of notifications from one user costs one database read per day.

use serde::{Deserialize, Serialize};

use super::cache_service::Cache;
use crate::domain::User;
use crate::shared::error::AppError;

/// Subset of the user profile cached for notification rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&User> for CachedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

impl CachedUser {
    /// Name to show in notification bodies.
    pub fn visible_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Cache wrapper for user profiles with a fixed TTL.
pub struct UserCache<C: Cache> {
    cache: C,
    ttl_secs: u64,
}

impl<C: Cache> UserCache<C> {
    /// Creates a user cache over the given backend with the given TTL.
    pub fn new(cache: C, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    fn key(user_id: i64) -> String {
        format!("user:{}", user_id)
    }

    /// Fetch a cached profile.
    pub async fn get(&self, user_id: i64) -> Result<Option<CachedUser>, AppError> {
        self.cache.get(&Self::key(user_id)).await
    }

    /// Store a profile with the configured TTL.
    pub async fn set(&self, user: &CachedUser) -> Result<(), AppError> {
        self.cache.set_ex(&Self::key(user.id), user, self.ttl_secs).await
    }

    /// Drop a cached profile, e.g. after a profile update.
    pub async fn invalidate(&self, user_id: i64) -> Result<bool, AppError> {
        self.cache.delete(&Self::key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::de::DeserializeOwned;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// In-memory cache backend for tests; TTLs are recorded, not enforced.
    #[derive(Default, Clone)]
    struct MemoryCache {
        entries: Arc<Mutex<HashMap<String, (String, u64)>>>,
    }

    #[async_trait]
    impl Cache for MemoryCache {
        async fn get<T: DeserializeOwned + Send>(
            &self,
            key: &str,
        ) -> Result<Option<T>, AppError> {
            let entries = self.entries.lock();
            match entries.get(key) {
                Some((data, _)) => Ok(Some(serde_json::from_str(data).unwrap())),
                None => Ok(None),
            }
        }

        async fn set_ex<T: serde::Serialize + Sync + Send>(
            &self,
            key: &str,
            value: &T,
            seconds: u64,
        ) -> Result<(), AppError> {
            self.entries
                .lock()
                .insert(key.to_string(), (serde_json::to_string(value).unwrap(), seconds));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, AppError> {
            Ok(self.entries.lock().remove(key).is_some())
        }
    }

    fn sample() -> CachedUser {
        CachedUser {
            id: 7,
            username: "greta".into(),
            display_name: Some("Greta".into()),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_with_ttl() {
        let backend = MemoryCache::default();
        let cache = UserCache::new(backend.clone(), 86_400);

        cache.set(&sample()).await.unwrap();

        let got = cache.get(7).await.unwrap().unwrap();
        assert_eq!(got, sample());

        let entries = backend.entries.lock();
        assert_eq!(entries.get("user:7").unwrap().1, 86_400);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = UserCache::new(MemoryCache::default(), 60);
        cache.set(&sample()).await.unwrap();

        assert!(cache.invalidate(7).await.unwrap());
        assert!(cache.get(7).await.unwrap().is_none());
    }
}
