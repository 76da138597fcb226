//! Process-local [`SessionStore`] backed by `dashmap`.
//!
//! Used when no database is configured and throughout the test suite. It can
//! be switched offline to exercise the infrastructure error paths.

use std::{
    cmp::Reverse,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::{BoxFuture, ready};
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    models::{ButtonPressEntity, RegistrationEntity, SessionConfigEntity, SessionEntity},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("in-memory store is offline")]
struct Offline;

#[derive(Default)]
struct MemoryInner {
    configs: DashMap<Uuid, SessionConfigEntity>,
    sessions: DashMap<Uuid, SessionEntity>,
    registrations: DashMap<Uuid, Vec<RegistrationEntity>>,
    presses: DashMap<Uuid, Vec<ButtonPressEntity>>,
    offline: AtomicBool,
}

/// In-memory session store.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again) as if the backend went away.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn guard(&self, operation: &str) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                format!("{operation} failed"),
                Offline,
            ));
        }
        Ok(())
    }

    fn run<T: Send + 'static>(
        &self,
        operation: &str,
        work: impl FnOnce(&MemoryInner) -> T,
    ) -> BoxFuture<'static, StorageResult<T>> {
        let result = self.guard(operation).map(|()| work(self.inner.as_ref()));
        Box::pin(ready(result))
    }
}

impl SessionStore for MemorySessionStore {
    fn save_config(&self, config: SessionConfigEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run("save_config", move |inner| {
            inner.configs.insert(config.id, config);
        })
    }

    fn find_config(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionConfigEntity>>> {
        self.run("find_config", move |inner| {
            inner.configs.get(&id).map(|entry| entry.clone())
        })
    }

    fn list_configs(&self) -> BoxFuture<'static, StorageResult<Vec<SessionConfigEntity>>> {
        self.run("list_configs", |inner| {
            inner
                .configs
                .iter()
                .map(|entry| entry.value().clone())
                .collect()
        })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run("save_session", move |inner| {
            inner.sessions.insert(session.id, session);
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.run("find_session", move |inner| {
            inner.sessions.get(&id).map(|entry| entry.clone())
        })
    }

    fn list_unfinished_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.run("list_unfinished_sessions", |inner| {
            let mut sessions: Vec<_> = inner
                .sessions
                .iter()
                .filter(|entry| entry.final_score.is_none())
                .map(|entry| entry.value().clone())
                .collect();
            sessions.sort_by_key(|session| session.scheduled_at);
            sessions
        })
    }

    fn list_community_sessions(
        &self,
        community_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.run("list_community_sessions", move |inner| {
            let mut sessions: Vec<_> = inner
                .sessions
                .iter()
                .filter(|entry| entry.community_id == community_id)
                .map(|entry| entry.value().clone())
                .collect();
            sessions.sort_by_key(|session| session.scheduled_at);
            sessions
        })
    }

    fn record_score(
        &self,
        session_id: Uuid,
        current_score: u32,
        final_score: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run("record_score", move |inner| {
            if let Some(mut session) = inner.sessions.get_mut(&session_id) {
                // A frozen final score is never overwritten.
                if session.final_score.is_none() {
                    session.current_score = current_score;
                    session.final_score = final_score;
                }
            }
        })
    }

    fn list_final_scores(
        &self,
        community_id: Option<Uuid>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.run("list_final_scores", move |inner| {
            let mut sessions: Vec<_> = inner
                .sessions
                .iter()
                .filter(|entry| entry.final_score.is_some())
                .filter(|entry| community_id.is_none_or(|id| entry.community_id == id))
                .map(|entry| entry.value().clone())
                .collect();
            sessions.sort_by_key(|session| Reverse(session.ends_at));
            sessions.truncate(limit);
            sessions
        })
    }

    fn insert_registration(
        &self,
        registration: RegistrationEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run("insert_registration", move |inner| {
            let mut entries = inner
                .registrations
                .entry(registration.session_id)
                .or_default();
            if entries
                .iter()
                .any(|existing| existing.user_id == registration.user_id)
            {
                false
            } else {
                entries.push(registration);
                true
            }
        })
    }

    fn list_registrations(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RegistrationEntity>>> {
        self.run("list_registrations", move |inner| {
            inner
                .registrations
                .get(&session_id)
                .map(|entries| entries.clone())
                .unwrap_or_default()
        })
    }

    fn append_press(&self, press: ButtonPressEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run("append_press", move |inner| {
            inner.presses.entry(press.session_id).or_default().push(press);
        })
    }

    fn list_presses(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ButtonPressEntity>>> {
        self.run("list_presses", move |inner| {
            inner
                .presses
                .get(&session_id)
                .map(|entries| entries.clone())
                .unwrap_or_default()
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.guard("health_check")))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.guard("reconnect")))
    }
}
