use crate::error::AuthSyncError;
use crate::types::Session;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

/// Scoped persistence of the current session tuple.
///
/// Implementations must replace and clear the tuple atomically: a concurrent
/// reader sees either the previous session, the new one, or none.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self) -> Result<Option<Session>, AuthSyncError>;
    async fn set(&self, session: Session) -> Result<(), AuthSyncError>;
    async fn clear(&self) -> Result<(), AuthSyncError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    current: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self) -> Result<Option<Session>, AuthSyncError> {
        Ok(self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn set(&self, session: Session) -> Result<(), AuthSyncError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthSyncError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn session(n: u32) -> Session {
        Session {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn set_get_clear() {
        let store = MemorySessionStore::new();
        assert!(store.get().await.unwrap().is_none());

        store.set(session(1)).await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap().access_token, "access-1");

        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_mixed_tuples() {
        let store = Arc::new(MemorySessionStore::new());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 0..500 {
                    if n % 7 == 0 {
                        store.clear().await.unwrap();
                    } else {
                        store.set(session(n)).await.unwrap();
                    }
                }
            })
        };

        for _ in 0..500 {
            if let Some(s) = store.get().await.unwrap() {
                let a = s.access_token.trim_start_matches("access-");
                let r = s.refresh_token.trim_start_matches("refresh-");
                assert_eq!(a, r);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
