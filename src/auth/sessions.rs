//! Server-side sessions with sliding expiration.
//!
//! Expiry is enforced twice: lazily, by [`SessionManager::get`] deleting an
//! expired session on first access, and by a periodic sweep that purges
//! abandoned sessions. The sweep is purely a cleanup optimization; `get` is
//! correct without it. The sweep re-evaluates `expires_at` inside the
//! collection write lock, so it can never delete a session that a concurrent
//! lookup just extended.

use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::Session;
use crate::store::{RecordStore, StoreError};

/// Collection holding session records.
pub const SESSIONS_COLLECTION: &str = "sessions";

/// How often the background sweep scans for expired sessions.
pub const SWEEP_INTERVAL_SECS: u64 = 15 * 60;

/// Generate an opaque session identifier (32 random bytes, hex-encoded).
fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

pub struct SessionManager {
    store: Arc<RecordStore>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<RecordStore>, timeout_minutes: i64) -> Self {
        Self {
            store,
            timeout: Duration::minutes(timeout_minutes),
        }
    }

    /// Create a session for a freshly authenticated user.
    pub async fn create(
        &self,
        user_id: &str,
        email: &str,
        user_agent: &str,
        ip: &str,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            id: generate_session_id(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            user_agent: user_agent.to_string(),
            ip: ip.to_string(),
            created_at: now,
            last_accessed_at: now,
            expires_at: now + self.timeout,
        };

        let record = session.clone();
        self.store
            .update(SESSIONS_COLLECTION, move |sessions: &mut Vec<Session>| {
                sessions.push(record);
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(session)
    }

    /// Look up a session. A valid session has its expiry extended (sliding
    /// window) and the extension persisted; an expired one is deleted on the
    /// spot and `None` is returned.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let id = session_id.to_string();
        let timeout = self.timeout;
        self.store
            .update(SESSIONS_COLLECTION, move |sessions: &mut Vec<Session>| {
                let now = Utc::now();
                let Some(index) = sessions.iter().position(|s| s.id == id) else {
                    return Ok::<_, StoreError>(None);
                };
                if sessions[index].is_expired(now) {
                    sessions.remove(index);
                    return Ok(None);
                }
                let session = &mut sessions[index];
                session.last_accessed_at = now;
                session.expires_at = now + timeout;
                Ok(Some(session.clone()))
            })
            .await
    }

    /// Explicitly destroy a session (logout).
    pub async fn destroy(&self, session_id: &str) -> Result<bool, StoreError> {
        let id = session_id.to_string();
        self.store
            .update(SESSIONS_COLLECTION, move |sessions: &mut Vec<Session>| {
                let before = sessions.len();
                sessions.retain(|s| s.id != id);
                Ok::<_, StoreError>(sessions.len() < before)
            })
            .await
    }

    /// Destroy every session belonging to a user (account deletion, forced
    /// global logout).
    pub async fn destroy_all_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let user_id = user_id.to_string();
        self.store
            .update(SESSIONS_COLLECTION, move |sessions: &mut Vec<Session>| {
                let before = sessions.len();
                sessions.retain(|s| s.user_id != user_id);
                Ok::<_, StoreError>(before - sessions.len())
            })
            .await
    }

    /// Delete every expired session. Expiry is re-checked here, under the
    /// collection lock, so a just-extended session survives the sweep.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let removed = self
            .store
            .update(SESSIONS_COLLECTION, |sessions: &mut Vec<Session>| {
                let now = Utc::now();
                let before = sessions.len();
                sessions.retain(|s| !s.is_expired(now));
                Ok::<_, StoreError>(before - sessions.len())
            })
            .await?;
        if removed > 0 {
            debug!(removed = removed, "Session sweep removed expired sessions");
        }
        Ok(removed)
    }
}

/// Spawn the periodic session sweep.
pub fn spawn_sweep_task(manager: Arc<SessionManager>) {
    info!(interval_secs = SWEEP_INTERVAL_SECS, "Starting session sweep task");
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(e) = manager.sweep().await {
                error!(error = %e, "Session sweep failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout_minutes: i64) -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        (dir, SessionManager::new(store, timeout_minutes))
    }

    async fn expire(manager: &SessionManager, session_id: &str) {
        let id = session_id.to_string();
        manager
            .store
            .update(SESSIONS_COLLECTION, move |sessions: &mut Vec<Session>| {
                let session = sessions.iter_mut().find(|s| s.id == id).unwrap();
                session.expires_at = Utc::now() - Duration::seconds(1);
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_and_get_extends_expiry() {
        let (_dir, manager) = manager(30);
        let session = manager
            .create("user-1", "bob@example.com", "test-agent", "127.0.0.1")
            .await
            .unwrap();
        assert_eq!(session.id.len(), 64);

        let before = Utc::now();
        let fetched = manager.get(&session.id).await.unwrap().unwrap();
        let expected = before + Duration::minutes(30);
        assert!((fetched.expires_at - expected).num_seconds().abs() < 5);
        assert!(fetched.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn expired_session_is_deleted_on_lookup() {
        let (_dir, manager) = manager(30);
        let session = manager
            .create("user-1", "bob@example.com", "test-agent", "127.0.0.1")
            .await
            .unwrap();
        expire(&manager, &session.id).await;

        assert!(manager.get(&session.id).await.unwrap().is_none());
        // Gone for good: the lazy delete removed the record.
        let sessions: Vec<Session> = manager.store.read(SESSIONS_COLLECTION).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn destroy_removes_only_the_target_session() {
        let (_dir, manager) = manager(30);
        let first = manager
            .create("user-1", "bob@example.com", "agent", "127.0.0.1")
            .await
            .unwrap();
        let second = manager
            .create("user-1", "bob@example.com", "agent", "127.0.0.1")
            .await
            .unwrap();

        assert!(manager.destroy(&first.id).await.unwrap());
        assert!(manager.get(&first.id).await.unwrap().is_none());
        assert!(manager.get(&second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn destroy_all_for_user_revokes_every_session() {
        let (_dir, manager) = manager(30);
        for _ in 0..3 {
            manager
                .create("user-1", "bob@example.com", "agent", "127.0.0.1")
                .await
                .unwrap();
        }
        let other = manager
            .create("user-2", "eve@example.com", "agent", "127.0.0.1")
            .await
            .unwrap();

        assert_eq!(manager.destroy_all_for_user("user-1").await.unwrap(), 3);
        assert!(manager.get(&other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_purges_expired_and_keeps_live_sessions() {
        let (_dir, manager) = manager(30);
        let stale = manager
            .create("user-1", "bob@example.com", "agent", "127.0.0.1")
            .await
            .unwrap();
        let live = manager
            .create("user-2", "eve@example.com", "agent", "127.0.0.1")
            .await
            .unwrap();
        expire(&manager, &stale.id).await;

        assert_eq!(manager.sweep().await.unwrap(), 1);
        assert!(manager.get(&live.id).await.unwrap().is_some());
    }
}
