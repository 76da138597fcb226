use std::sync::Arc;

use futures::StreamExt;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use discordinate_back::{
    config::AppConfig,
    dao::session_store::{SessionStore, memory::MemorySessionStore},
    dto::{
        config::CreateSessionConfigRequest,
        leaderboard::FinalScoreQuery,
        phase::VisibleSessionPhase,
        session::{CreateSessionRequest, JoinQueueRequest, RegistrationStatus},
    },
    error::ServiceError,
    services::{session_service, sse_service, storage_supervisor},
    state::{AppState, SharedState, clock::ManualClock},
};

struct App {
    state: SharedState,
    clock: Arc<ManualClock>,
    store: MemorySessionStore,
    origin: OffsetDateTime,
}

impl App {
    async fn start() -> Self {
        let origin = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let clock = Arc::new(ManualClock::new(origin));
        let config = AppConfig::from_json(r#"{"tick_interval_ms": 3600000}"#).unwrap();
        let state = AppState::with_clock(config, clock.clone());
        let store = MemorySessionStore::new();
        let dyn_store: Arc<dyn SessionStore> = Arc::new(store.clone());
        storage_supervisor::activate(&state, &dyn_store).await;
        Self {
            state,
            clock,
            store,
            origin,
        }
    }

    fn at(&self, instant: OffsetDateTime) {
        self.clock.set(instant);
    }

    async fn config(&self, countdown: u32, button: u32, timeout: u32, window: u32) -> Uuid {
        session_service::create_config(
            &self.state,
            CreateSessionConfigRequest {
                countdown_seconds: countdown,
                button_press_seconds: button,
                button_press_timeout_seconds: timeout,
                score_window_seconds: window,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn schedule(
        &self,
        community_id: Uuid,
        scheduled_at: OffsetDateTime,
        config_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        session_service::create_session(
            &self.state,
            community_id,
            CreateSessionRequest {
                scheduled_at: scheduled_at.format(&Rfc3339).unwrap(),
                config_id,
                creator_id: Uuid::new_v4(),
            },
        )
        .await
        .map(|status| status.session_id)
    }

    async fn press(&self, session_id: Uuid, user_id: Uuid) -> Result<u32, ServiceError> {
        session_service::press(&self.state, Some(session_id), Some(user_id))
            .await
            .map(|accepted| accepted.current_score)
    }
}

#[tokio::test]
async fn phases_cooldown_and_final_score() {
    let app = App::start().await;
    let config_id = app.config(10, 20, 5, 10).await;
    let start = app.origin + Duration::minutes(1);
    let session_id = app
        .schedule(Uuid::new_v4(), start, Some(config_id))
        .await
        .unwrap();
    let user = Uuid::new_v4();

    app.at(start + Duration::seconds(5));
    assert!(matches!(
        app.press(session_id, user).await,
        Err(ServiceError::PhaseViolation(_))
    ));

    app.at(start + Duration::seconds(12));
    assert_eq!(app.press(session_id, user).await.unwrap(), 1);

    app.at(start + Duration::seconds(14));
    assert!(matches!(
        app.press(session_id, user).await,
        Err(ServiceError::CooldownActive { .. })
    ));

    app.at(start + Duration::seconds(17));
    let last = app.press(session_id, user).await.unwrap();

    app.at(start + Duration::seconds(31));
    let status = session_service::status(&app.state, session_id)
        .await
        .unwrap();
    assert_eq!(status.phase, VisibleSessionPhase::Ended);
    assert_eq!(status.final_score, Some(last));

    // Presses after the end are refused and the score stays frozen.
    assert!(matches!(
        app.press(session_id, Uuid::new_v4()).await,
        Err(ServiceError::PhaseViolation(_))
    ));
    let stored = app.store.find_session(session_id).await.unwrap().unwrap();
    assert_eq!(stored.final_score, Some(last));
}

#[tokio::test]
async fn three_users_in_one_window_score_three() {
    let app = App::start().await;
    let config_id = app.config(10, 20, 5, 1).await;
    let start = app.origin + Duration::minutes(1);
    let session_id = app
        .schedule(Uuid::new_v4(), start, Some(config_id))
        .await
        .unwrap();

    let mut score = 0;
    for offset in [12.0, 12.3, 12.8] {
        app.at(start + Duration::seconds_f64(offset));
        score = app.press(session_id, Uuid::new_v4()).await.unwrap();
    }
    assert_eq!(score, 3);

    app.at(start + Duration::seconds(40));
    let status = session_service::status(&app.state, session_id)
        .await
        .unwrap();
    assert_eq!(status.final_score, Some(3));

    let leaderboard = session_service::list_final_scores(
        &app.state,
        FinalScoreQuery {
            community_id: None,
            limit: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(leaderboard.len(), 1);
    assert_eq!(leaderboard[0].final_score, 3);
}

#[tokio::test]
async fn creation_guard_and_past_instants_are_rejected() {
    let app = App::start().await;
    let community = Uuid::new_v4();
    let start = app.origin + Duration::hours(1);
    app.schedule(community, start, None).await.unwrap();

    assert!(matches!(
        app.schedule(community, start + Duration::minutes(2), None)
            .await,
        Err(ServiceError::Conflict(_))
    ));
    assert!(
        app.schedule(community, start + Duration::minutes(10), None)
            .await
            .is_ok()
    );
    assert!(
        app.schedule(Uuid::new_v4(), start + Duration::minutes(2), None)
            .await
            .is_ok()
    );
    assert!(matches!(
        app.schedule(community, app.origin - Duration::minutes(1), None)
            .await,
        Err(ServiceError::InvalidInput(_))
    ));
    assert!(matches!(
        app.schedule(community, start + Duration::hours(2), Some(Uuid::new_v4()))
            .await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn queue_joins_share_the_pending_session() {
    let app = App::start().await;
    let community = Uuid::new_v4();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

    let opened = session_service::join_queue(&app.state, community, JoinQueueRequest { user_id: first })
        .await
        .unwrap();
    assert!(opened.created);
    assert_eq!(opened.status, RegistrationStatus::Registered);
    assert_eq!(opened.session.phase, VisibleSessionPhase::Scheduled);

    let joined =
        session_service::join_queue(&app.state, community, JoinQueueRequest { user_id: second })
            .await
            .unwrap();
    assert!(!joined.created);
    assert_eq!(joined.session.session_id, opened.session.session_id);
    assert_eq!(joined.session.registered, 2);

    let again = session_service::register(&app.state, opened.session.session_id, first)
        .await
        .unwrap();
    assert_eq!(again.status, RegistrationStatus::AlreadyRegistered);

    let listing = session_service::list_community_sessions(&app.state, community)
        .await
        .unwrap();
    assert_eq!(listing.upcoming.len(), 1);
    assert_eq!(listing.upcoming[0].started_by, Some(first));
    assert!(listing.ongoing.is_empty());
    assert!(listing.past.is_empty());
}

#[tokio::test]
async fn writes_fail_cleanly_without_a_store() {
    let app = App::start().await;
    let community = Uuid::new_v4();
    let session_id = app
        .schedule(community, app.origin + Duration::minutes(1), None)
        .await
        .unwrap();

    app.state.clear_store().await;
    assert!(matches!(
        app.schedule(community, app.origin + Duration::hours(1), None)
            .await,
        Err(ServiceError::Degraded)
    ));

    // The press is refused and no cooldown is left behind.
    let user = Uuid::new_v4();
    let default = app.state.default_config().await;
    app.at(app.origin + Duration::minutes(1) + default.countdown() + Duration::seconds(1));
    assert!(matches!(
        app.press(session_id, user).await,
        Err(ServiceError::Degraded)
    ));

    let dyn_store: Arc<dyn SessionStore> = Arc::new(app.store.clone());
    storage_supervisor::activate(&app.state, &dyn_store).await;
    assert_eq!(app.press(session_id, user).await.unwrap(), 1);
}

#[tokio::test]
async fn evicted_sessions_stream_their_final_state_once() {
    let app = App::start().await;
    let config_id = app.config(0, 5, 5, 5).await;
    let start = app.origin + Duration::minutes(1);
    let session_id = app
        .schedule(Uuid::new_v4(), start, Some(config_id))
        .await
        .unwrap();

    app.at(start + Duration::seconds(1));
    app.press(session_id, Uuid::new_v4()).await.unwrap();
    app.at(start + Duration::seconds(10));
    let ended = session_service::status(&app.state, session_id)
        .await
        .unwrap();
    assert_eq!(ended.final_score, Some(1));

    let mut evicted = false;
    for _ in 0..100 {
        if app.state.evict(session_id) {
            evicted = true;
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(evicted);

    let events: Vec<_> = sse_service::session_events(&app.state, session_id)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event.as_deref(), Some("handshake"));
    assert_eq!(events[1].event.as_deref(), Some("session_update"));
    assert!(events[1].data.contains("\"final_score\":1"));
    assert!(events[1].data.contains("\"kind\":\"ended\""));

    assert!(matches!(
        sse_service::session_events(&app.state, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    ));
}
