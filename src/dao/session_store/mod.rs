pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    ButtonPressEntity, RegistrationEntity, SessionConfigEntity, SessionEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for sessions, configs, registrations
/// and the durable press ledger.
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session config.
    fn save_config(&self, config: SessionConfigEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch a config by id.
    fn find_config(&self, id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<SessionConfigEntity>>>;
    /// List every stored config.
    fn list_configs(&self) -> BoxFuture<'static, StorageResult<Vec<SessionConfigEntity>>>;

    /// Insert or replace a session.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch a session by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Sessions whose final score is not set yet.
    fn list_unfinished_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Sessions of a community ordered by `scheduled_at`.
    fn list_community_sessions(
        &self,
        community_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Persist the running score and, once ended, the final score.
    fn record_score(
        &self,
        session_id: Uuid,
        current_score: u32,
        final_score: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Ended sessions, most recent first, optionally restricted to one community.
    fn list_final_scores(
        &self,
        community_id: Option<Uuid>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;

    /// Store a registration; returns `false` when the pair already exists.
    fn insert_registration(
        &self,
        registration: RegistrationEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Registrations of a session in registration order.
    fn list_registrations(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RegistrationEntity>>>;

    /// Durably append an accepted press.
    fn append_press(&self, press: ButtonPressEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Presses of a session in storage order.
    fn list_presses(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ButtonPressEntity>>>;

    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
