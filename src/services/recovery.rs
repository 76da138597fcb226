//! Rebuild in-memory sessions from the store after it has been installed.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{SessionConfigEntity, SessionEntity},
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    error::ServiceError,
    state::{
        SharedState,
        scheduler::SessionHandle,
        session::{ButtonPress, Registration, Session, SessionConfig},
        state_machine::SessionMachine,
    },
};

/// Select the default config and restart the scheduler of every unfinished session.
///
/// Returns the number of sessions restored. Sessions already in memory are
/// left untouched, so running this after each reconnection is harmless.
pub async fn recover(state: &SharedState, store: &Arc<dyn SessionStore>) -> StorageResult<usize> {
    ensure_default_config(state, store).await?;

    let mut restored = 0;
    for entity in store.list_unfinished_sessions().await? {
        let session_id = entity.id;
        if state.is_tracked(session_id) {
            continue;
        }
        match restore_session(state, store, entity).await {
            Ok(_) => restored += 1,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to restore session");
            }
        }
    }

    info!(restored, "session recovery complete");
    Ok(restored)
}

/// Use the stored default config, or persist the configured one when none exists.
pub async fn ensure_default_config(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
) -> StorageResult<()> {
    let stored = store
        .list_configs()
        .await?
        .into_iter()
        .filter(|entity| entity.is_default)
        .map(SessionConfig::from)
        .find(|config| config.validate().is_ok());

    match stored {
        Some(config) => state.set_default_config(Arc::new(config)).await,
        None => {
            let config = state.default_config().await;
            store
                .save_config(SessionConfigEntity::from(config.as_ref()))
                .await?;
            info!(config_id = %config.id, "default session config persisted");
        }
    }
    Ok(())
}

/// Spawn the scheduler of a stored session, reading back its registrations and
/// presses. Returns the existing handle when the session is already in memory.
pub(crate) async fn restore_session(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    entity: SessionEntity,
) -> Result<SessionHandle, ServiceError> {
    let _gate = state.creation_gate().await;
    if let Some(handle) = state.session(entity.id) {
        return Ok(handle);
    }

    let config = load_config(state, store, entity.config_id).await?;
    let registrations = store.list_registrations(entity.id).await?;
    let presses = store.list_presses(entity.id).await?;
    let press_count = presses.len();

    let session = Session::from((entity, config));
    let session_id = session.id;
    let machine = SessionMachine::restore(
        session,
        registrations.into_iter().map(Registration::from),
        presses.into_iter().map(ButtonPress::from),
        state.now(),
    );
    info!(
        session_id = %session_id,
        presses = press_count,
        registered = machine.registered_count(),
        current_score = machine.session().current_score,
        "session restored"
    );
    Ok(state.track_session(machine))
}

async fn load_config(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    config_id: Uuid,
) -> StorageResult<Arc<SessionConfig>> {
    if let Some(config) = state.cached_config(config_id) {
        return Ok(config);
    }

    let entity = store
        .find_config(config_id)
        .await?
        .ok_or_else(|| StorageError::Corrupted(format!("missing session config {config_id}")))?;
    let config = SessionConfig::from(entity);
    config
        .validate()
        .map_err(|err| StorageError::Corrupted(format!("session config {config_id}: {err}")))?;
    Ok(state.cache_config(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{ButtonPressEntity, RegistrationEntity},
            session_store::memory::MemorySessionStore,
        },
        state::{
            AppState,
            clock::{Clock, ManualClock},
            phase_clock::Phase,
        },
    };

    async fn seeded() -> (SharedState, Arc<ManualClock>, Arc<dyn SessionStore>, Uuid) {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let state = AppState::with_clock(AppConfig::default(), clock.clone());
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

        let config = Arc::new(SessionConfig::new(10, 20, 5, 10).unwrap());
        store
            .save_config(SessionConfigEntity::from(config.as_ref()))
            .await
            .unwrap();
        let session = Session::new(Uuid::new_v4(), start, config, Uuid::new_v4(), None, start);
        store
            .save_session(SessionEntity::from(&session))
            .await
            .unwrap();

        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        for user_id in [first, second] {
            store
                .insert_registration(RegistrationEntity::from(&Registration {
                    session_id: session.id,
                    user_id,
                    registered_at: start - Duration::seconds(30),
                }))
                .await
                .unwrap();
        }
        for (user_id, offset) in [(first, 11), (second, 12)] {
            store
                .append_press(ButtonPressEntity::from(&ButtonPress {
                    session_id: session.id,
                    user_id,
                    pressed_at: start + Duration::seconds(offset),
                }))
                .await
                .unwrap();
        }

        (state, clock, store, session.id)
    }

    #[tokio::test]
    async fn unfinished_sessions_resume_with_their_ledger() {
        let (state, clock, store, session_id) = seeded().await;
        clock.set(clock.now() + Duration::seconds(13));

        assert_eq!(recover(&state, &store).await.unwrap(), 1);
        let handle = state.session(session_id).unwrap();
        let status = handle.status_at(state.now());
        assert_eq!(status.phase, Phase::ButtonPhase);
        assert_eq!(status.current_score, 2);
        assert_eq!(status.registered, 2);

        // Recovering twice neither duplicates the task nor the presses.
        assert_eq!(recover(&state, &store).await.unwrap(), 0);
        assert_eq!(store.list_presses(session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_survives_a_restart() {
        let (state, clock, store, session_id) = seeded().await;
        clock.set(clock.now() + Duration::seconds(13));
        recover(&state, &store).await.unwrap();
        state.install_store(Arc::clone(&store)).await;

        let handle = state.session(session_id).unwrap();
        let first = store.list_registrations(session_id).await.unwrap()[0].user_id;
        let pressed = store
            .list_presses(session_id)
            .await
            .unwrap()
            .into_iter()
            .any(|press| press.user_id == first);
        assert!(pressed);
        assert!(matches!(
            handle.press(first).await,
            Err(ServiceError::CooldownActive { .. })
        ));
    }

    #[tokio::test]
    async fn sessions_past_their_end_finalize_on_restore() {
        let (state, clock, store, session_id) = seeded().await;
        clock.set(clock.now() + Duration::seconds(60));
        state.install_store(Arc::clone(&store)).await;
        let mut finals = state.hub().subscribe_final_scores();

        recover(&state, &store).await.unwrap();

        let announced = finals.recv().await.unwrap();
        assert_eq!(announced.session_id, session_id);
        assert_eq!(announced.final_score, 2);
        let stored = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(stored.final_score, Some(2));
    }

    #[tokio::test]
    async fn default_config_is_persisted_once() {
        let (state, _, store, _) = seeded().await;
        ensure_default_config(&state, &store).await.unwrap();
        ensure_default_config(&state, &store).await.unwrap();

        let defaults: Vec<_> = store
            .list_configs()
            .await
            .unwrap()
            .into_iter()
            .filter(|config| config.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, state.default_config().await.id);
    }
}
