//! Opaque login sessions backed by `user_sessions`, with an in-memory cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::data::models::AppRole;
use crate::data::{roles, user_sessions};

/// How long a resolved session is trusted before re-reading the database.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// The signed-in user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub roles: Vec<AppRole>,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&AppRole::Admin)
    }

    /// Staff-level access; admins are staff too.
    pub fn is_staff(&self) -> bool {
        self.is_admin() || self.roles.contains(&AppRole::Staff)
    }
}

#[derive(Debug, Clone)]
struct CachedSession {
    user: SessionUser,
    expires_at: DateTime<Utc>,
    cached_at: Instant,
}

/// Generate a 256-bit session token, hex encoded.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct SessionCache {
    db_pool: PgPool,
    entries: Arc<DashMap<String, CachedSession>>,
}

impl SessionCache {
    pub fn new(db_pool: PgPool) -> Self {
        Self {
            db_pool,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Resolve a token to its user, consulting the cache first.
    pub async fn resolve(&self, token: &str) -> anyhow::Result<Option<SessionUser>> {
        if let Some(entry) = self.entries.get(token) {
            if entry.expires_at > Utc::now() && entry.cached_at.elapsed() < CACHE_TTL {
                return Ok(Some(entry.user.clone()));
            }
        }
        self.entries.remove(token);

        let Some((user_id, expires_at)) = user_sessions::lookup(&self.db_pool, token).await? else {
            return Ok(None);
        };
        let user = SessionUser {
            id: user_id,
            roles: roles::for_user(&self.db_pool, user_id).await?,
        };
        self.insert(token, user.clone(), expires_at);
        Ok(Some(user))
    }

    pub fn insert(&self, token: &str, user: SessionUser, expires_at: DateTime<Utc>) {
        self.entries.insert(
            token.to_owned(),
            CachedSession {
                user,
                expires_at,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn evict(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Drop every cached session of a user, e.g. after a role change.
    pub fn evict_user(&self, user_id: Uuid) {
        self.entries.retain(|_, s| s.user.id != user_id);
    }

    /// Remove expired or stale entries. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        let now = Utc::now();
        self.entries
            .retain(|_, s| s.expires_at > now && s.cached_at.elapsed() < CACHE_TTL);
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            debug!(pruned, "Pruned session cache");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sqlx::postgres::PgPoolOptions;

    fn cache() -> SessionCache {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        SessionCache::new(pool)
    }

    fn member(id: Uuid) -> SessionUser {
        SessionUser {
            id,
            roles: vec![AppRole::Member],
        }
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn role_checks() {
        let staff = SessionUser {
            id: Uuid::nil(),
            roles: vec![AppRole::Member, AppRole::Staff],
        };
        assert!(staff.is_staff());
        assert!(!staff.is_admin());
        let admin = SessionUser {
            id: Uuid::nil(),
            roles: vec![AppRole::Admin],
        };
        assert!(admin.is_staff() && admin.is_admin());
        assert!(!member(Uuid::nil()).is_staff());
    }

    #[tokio::test]
    async fn cached_session_resolves_without_database() {
        let cache = cache();
        let id = Uuid::new_v4();
        cache.insert("tok", member(id), Utc::now() + ChronoDuration::hours(1));
        let user = cache.resolve("tok").await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn evict_user_drops_all_their_sessions() {
        let cache = cache();
        let id = Uuid::new_v4();
        let later = Utc::now() + ChronoDuration::hours(1);
        cache.insert("a", member(id), later);
        cache.insert("b", member(id), later);
        cache.insert("c", member(Uuid::new_v4()), later);
        cache.evict_user(id);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn prune_drops_expired_entries() {
        let cache = cache();
        cache.insert("old", member(Uuid::new_v4()), Utc::now() - ChronoDuration::seconds(1));
        cache.insert("new", member(Uuid::new_v4()), Utc::now() + ChronoDuration::hours(1));
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.len(), 1);
    }
}
