pub mod clock;
pub mod cooldown;
pub mod hub;
pub mod ledger;
pub mod phase_clock;
pub mod scheduler;
pub mod score;
pub mod session;
pub mod state_machine;

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, MutexGuard, RwLock, watch},
    time::sleep,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    state::{
        clock::{Clock, SystemClock},
        hub::NotificationHub,
        scheduler::{SchedulerContext, SessionHandle, spawn_session},
        session::SessionConfig,
        state_machine::SessionMachine,
    },
};

/// Application state shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;
/// Slot holding the currently installed store, shared with session tasks.
pub type StoreSlot = Arc<RwLock<Option<Arc<dyn SessionStore>>>>;

/// Central application state: the session arena, the store and the notification hub.
pub struct AppState {
    store: StoreSlot,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    hub: Arc<NotificationHub>,
    sessions: DashMap<Uuid, SessionHandle>,
    configs: DashMap<Uuid, Arc<SessionConfig>>,
    default_config: RwLock<Arc<SessionConfig>>,
    creation_gate: Mutex<()>,
}

impl AppState {
    /// Construct a new [`AppState`] reading time from the system clock.
    ///
    /// The application starts in degraded mode until a store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construct a new [`AppState`] with an explicit time source.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let default_config = Arc::new(config.default_session_config());
        let configs = DashMap::new();
        configs.insert(default_config.id, Arc::clone(&default_config));

        Arc::new(Self {
            store: Arc::new(RwLock::new(None)),
            degraded: degraded_tx,
            hub: Arc::new(NotificationHub::new(config.final_score_capacity)),
            sessions: DashMap::new(),
            configs,
            default_config: RwLock::new(default_config),
            creation_gate: Mutex::new(()),
            clock,
            config,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current instant according to the application clock.
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Notification hub for session updates and final scores.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Handle of a session kept in memory.
    pub fn session(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Whether a session is kept in memory.
    pub fn is_tracked(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of sessions kept in memory.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// In-memory handles of a community's sessions, ordered by start.
    pub fn community_sessions(&self, community_id: Uuid) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| entry.community_id() == community_id)
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(SessionHandle::scheduled_at);
        handles
    }

    /// Spawn the scheduler of a session and keep its handle until it ended
    /// and the retention delay elapsed.
    pub fn track_session(self: &Arc<Self>, machine: SessionMachine) -> SessionHandle {
        let session_id = machine.id();
        let (handle, join) = spawn_session(machine, self.scheduler_context());
        self.sessions.insert(session_id, handle.clone());

        let state: Weak<Self> = Arc::downgrade(self);
        let retention = self.config.ended_retention;
        tokio::spawn(async move {
            if let Err(err) = join.await {
                error!(session_id = %session_id, error = %err, "session scheduler crashed");
            }
            sleep(retention).await;
            if let Some(state) = state.upgrade() {
                state.evict(session_id);
            }
        });

        handle
    }

    /// Drop a finished session from memory. Running sessions are kept.
    pub fn evict(&self, session_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(&session_id, |_, handle| handle.is_finished())
            .is_some();
        if removed {
            self.hub.close(session_id);
            debug!(session_id = %session_id, "evicted ended session");
        }
        removed
    }

    /// Look a config up in the cache.
    pub fn cached_config(&self, id: Uuid) -> Option<Arc<SessionConfig>> {
        self.configs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remember a config so sessions can share it.
    pub fn cache_config(&self, config: Arc<SessionConfig>) -> Arc<SessionConfig> {
        Arc::clone(
            self.configs
                .entry(config.id)
                .or_insert(config)
                .value(),
        )
    }

    /// Every cached config, the default one first.
    pub fn cached_configs(&self) -> Vec<Arc<SessionConfig>> {
        let mut configs: Vec<_> = self
            .configs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        configs.sort_by_key(|config| !config.is_default);
        configs
    }

    /// Config used when a session does not name one.
    pub async fn default_config(&self) -> Arc<SessionConfig> {
        Arc::clone(&*self.default_config.read().await)
    }

    /// Replace the default config, typically by the one found in the store.
    pub async fn set_default_config(&self, config: Arc<SessionConfig>) {
        let config = self.cache_config(config);
        info!(config_id = %config.id, "default session config selected");
        let selected = config.id;
        let previous = std::mem::replace(&mut *self.default_config.write().await, config);
        if previous.id != selected {
            self.configs.remove(&previous.id);
        }
    }

    /// Serializes session creation so the guard window check cannot race.
    pub async fn creation_gate(&self) -> MutexGuard<'_, ()> {
        self.creation_gate.lock().await
    }

    fn scheduler_context(&self) -> SchedulerContext {
        SchedulerContext {
            clock: Arc::clone(&self.clock),
            hub: Arc::clone(&self.hub),
            store: Arc::clone(&self.store),
            tick_interval: self.config.tick_interval,
            command_capacity: self.config.command_capacity,
            request_timeout: self.config.request_timeout,
        }
    }

    /// Update and broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
