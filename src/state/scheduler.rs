//! One Tokio task per active session.
//!
//! The task exclusively owns the [`SessionMachine`] and is the only writer of
//! the session state. Presses, registrations and refresh requests reach it
//! through a bounded command queue and are answered over `oneshot` channels;
//! reads go through the [`NotificationHub`] snapshot instead.

use std::{future::pending, sync::Arc, time::Duration as StdDuration};

use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{ButtonPressEntity, RegistrationEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
    state::{
        StoreSlot,
        clock::Clock,
        hub::{FinalScore, NotificationHub, SessionUpdate, UpdateKind},
        phase_clock::{Phase, next_boundary, phase_of},
        session::{Registration, SessionConfig},
        state_machine::{
            PressRejection, RegistrationError, RegistrationOutcome, SessionMachine,
        },
    },
};

/// Attempts made to persist a final score before giving up until next recovery.
const FINAL_SCORE_ATTEMPTS: u32 = 3;
/// Delay before the first final score retry, doubled after each failure.
const FINAL_SCORE_RETRY_DELAY: StdDuration = StdDuration::from_millis(200);
/// Extra delay after a phase boundary so the clock reads past it on wake-up.
const BOUNDARY_SLACK: StdDuration = StdDuration::from_millis(5);

/// Everything a scheduler task needs besides its session.
#[derive(Clone)]
pub struct SchedulerContext {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Fan-out for state updates and final scores.
    pub hub: Arc<NotificationHub>,
    /// Currently installed store, if any.
    pub store: StoreSlot,
    /// Refresh tick period.
    pub tick_interval: StdDuration,
    /// Capacity of the command queue.
    pub command_capacity: usize,
    /// How long a caller waits for an answer.
    pub request_timeout: StdDuration,
}

/// A press accepted and durably recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressAccepted {
    /// Session the press was recorded in.
    pub session_id: Uuid,
    /// Pressing user.
    pub user_id: Uuid,
    /// Server-side press instant.
    pub pressed_at: OffsetDateTime,
    /// Score after the press.
    pub current_score: u32,
}

enum SessionCommand {
    Press {
        user_id: Uuid,
        reply: oneshot::Sender<Result<PressAccepted, ServiceError>>,
    },
    Register {
        user_id: Uuid,
        reply: oneshot::Sender<Result<RegistrationOutcome, ServiceError>>,
    },
    Refresh {
        reply: oneshot::Sender<SessionUpdate>,
    },
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    community_id: Uuid,
    scheduled_at: OffsetDateTime,
    config: Arc<SessionConfig>,
    created_by: Uuid,
    started_by: Option<Uuid>,
    commands: mpsc::Sender<SessionCommand>,
    updates: watch::Receiver<SessionUpdate>,
    request_timeout: StdDuration,
}

impl SessionHandle {
    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Owning community.
    pub fn community_id(&self) -> Uuid {
        self.community_id
    }

    /// Countdown start.
    pub fn scheduled_at(&self) -> OffsetDateTime {
        self.scheduled_at
    }

    /// Config of the session.
    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    /// End of the button phase.
    pub fn ends_at(&self) -> OffsetDateTime {
        self.scheduled_at + self.config.total()
    }

    /// Creator of the session.
    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    /// User whose queue join opened the session.
    pub fn started_by(&self) -> Option<Uuid> {
        self.started_by
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionUpdate {
        self.updates.borrow().clone()
    }

    /// New subscription; it already holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<SessionUpdate> {
        self.updates.clone()
    }

    /// Latest state with phase, remaining time and progress evaluated at `now`.
    ///
    /// Served without involving the task. Once the task froze the final score
    /// the session reads as ended regardless of `now`.
    pub fn status_at(&self, now: OffsetDateTime) -> SessionUpdate {
        let mut update = self.snapshot();
        if update.final_score.is_some() {
            return update;
        }
        let reading = phase_of(now, self.scheduled_at, &self.config);
        update.phase = reading.phase;
        update.seconds_remaining = reading.seconds_remaining();
        update.progress = reading.progress;
        update.emitted_at = now;
        update
    }

    /// Submit a press for `user_id`.
    pub async fn press(&self, user_id: Uuid) -> Result<PressAccepted, ServiceError> {
        match self
            .request(|reply| SessionCommand::Press { user_id, reply })
            .await?
        {
            Some(result) => result,
            None => Err(PressRejection::NotButtonPhase {
                phase: Phase::Ended,
            }
            .into()),
        }
    }

    /// Register `user_id` to the session.
    pub async fn register(&self, user_id: Uuid) -> Result<RegistrationOutcome, ServiceError> {
        match self
            .request(|reply| SessionCommand::Register { user_id, reply })
            .await?
        {
            Some(result) => result,
            None => Err(RegistrationError::TooLate {
                phase: Phase::Ended,
            }
            .into()),
        }
    }

    /// Ask the task to re-evaluate its clock and return the resulting state.
    pub async fn refresh(&self) -> Result<SessionUpdate, ServiceError> {
        Ok(self
            .request(|reply| SessionCommand::Refresh { reply })
            .await?
            .unwrap_or_else(|| self.snapshot()))
    }

    /// Send a command and wait for the reply. `None` means the task is gone.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<Option<T>, ServiceError> {
        let (reply, response) = oneshot::channel();
        let command = build(reply);
        let exchange = async {
            if self.commands.send(command).await.is_err() {
                return None;
            }
            response.await.ok()
        };
        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ServiceError::Timeout)
    }
}

/// Spawn the task driving `machine`, returning its handle and join handle.
pub fn spawn_session(
    machine: SessionMachine,
    context: SchedulerContext,
) -> (SessionHandle, JoinHandle<()>) {
    let now = context.clock.now();
    let session = machine.session();
    let updates = context.hub.open(machine.update(now, UpdateKind::Snapshot));
    let (commands, inbox) = mpsc::channel(context.command_capacity.max(1));

    let handle = SessionHandle {
        session_id: session.id,
        community_id: session.community_id,
        scheduled_at: session.scheduled_at,
        config: Arc::clone(&session.config),
        created_by: session.created_by,
        started_by: session.started_by,
        commands,
        updates,
        request_timeout: context.request_timeout,
    };

    let task = SessionTask {
        machine,
        context,
        inbox,
    };
    let join = tokio::spawn(task.run());
    (handle, join)
}

struct SessionTask {
    machine: SessionMachine,
    context: SchedulerContext,
    inbox: mpsc::Receiver<SessionCommand>,
}

impl SessionTask {
    async fn run(mut self) {
        let session_id = self.machine.id();
        info!(
            session_id = %session_id,
            scheduled_at = %self.machine.session().scheduled_at,
            "session scheduler started"
        );

        let mut ticker = interval(self.context.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A session restored after its end finalizes on the first pass.
        self.refresh(UpdateKind::Snapshot).await;

        while !self.machine.session().is_finalized() {
            let wake = self.until_next_boundary();
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!(session_id = %session_id, "all session handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.refresh(UpdateKind::Tick).await;
                }
                _ = async {
                    match wake {
                        Some(delay) => sleep(delay).await,
                        None => pending::<()>().await,
                    }
                } => {
                    self.refresh(UpdateKind::Tick).await;
                }
            }
        }

        info!(
            session_id = %session_id,
            final_score = ?self.machine.session().final_score,
            "session scheduler stopped"
        );
    }

    fn until_next_boundary(&self) -> Option<StdDuration> {
        let now = self.context.clock.now();
        let session = self.machine.session();
        next_boundary(now, session.scheduled_at, &session.config)
            .and_then(|at| StdDuration::try_from(at - now).ok())
            .map(|delay| delay + BOUNDARY_SLACK)
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Press { user_id, reply } => {
                let result = self.press(user_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Register { user_id, reply } => {
                let result = self.register(user_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Refresh { reply } => {
                let update = self.refresh(UpdateKind::Tick).await;
                let _ = reply.send(update);
            }
        }
    }

    /// Re-evaluate the clock, publish what changed and return the new state.
    async fn refresh(&mut self, kind: UpdateKind) -> SessionUpdate {
        let now = self.context.clock.now();
        let observation = self.machine.observe(now);

        if let Some(transition) = observation.transition {
            info!(
                session_id = %self.machine.id(),
                from = ?transition.from,
                to = ?transition.to,
                "session phase changed"
            );
        }

        if let Some(final_score) = observation.finalized {
            self.persist_final_score(final_score).await;
            let update = self.machine.update(now, UpdateKind::Ended);
            self.context.hub.publish(update.clone());
            let session = self.machine.session();
            self.context.hub.announce_final(FinalScore {
                session_id: session.id,
                community_id: session.community_id,
                final_score,
                ended_at: session.ends_at(),
            });
            return update;
        }

        let kind = if observation.transition.is_some() {
            UpdateKind::PhaseChanged
        } else {
            kind
        };
        let update = self.machine.update(now, kind);
        self.context.hub.publish(update.clone());
        update
    }

    async fn press(&mut self, user_id: Uuid) -> Result<PressAccepted, ServiceError> {
        self.refresh(UpdateKind::Tick).await;
        let now = self.context.clock.now();
        let session_id = self.machine.id();

        let plan = self.machine.plan_press(user_id, now).inspect_err(|rejection| {
            debug!(session_id = %session_id, user_id = %user_id, %rejection, "press rejected");
        })?;

        let Some(store) = self.store().await else {
            self.machine.abort_press(plan);
            return Err(ServiceError::Degraded);
        };

        let press = plan.press(session_id);
        if let Err(err) = store.append_press(ButtonPressEntity::from(&press)).await {
            warn!(
                session_id = %session_id,
                user_id = %user_id,
                error = %err,
                "failed to record press; cooldown released"
            );
            self.machine.abort_press(plan);
            return Err(err.into());
        }

        let previous = self.machine.session().current_score;
        let current_score = self.machine.apply_press(plan)?;
        if current_score != previous {
            self.context
                .hub
                .publish(self.machine.update(now, UpdateKind::ScoreChanged));
            if let Err(err) = store.record_score(session_id, current_score, None).await {
                // The ledger is durable; the score is recomputed from it on recovery.
                warn!(session_id = %session_id, error = %err, "failed to persist running score");
            }
        }

        Ok(PressAccepted {
            session_id,
            user_id,
            pressed_at: press.pressed_at,
            current_score,
        })
    }

    async fn register(&mut self, user_id: Uuid) -> Result<RegistrationOutcome, ServiceError> {
        self.refresh(UpdateKind::Tick).await;
        let now = self.context.clock.now();

        self.machine.registration_open(now)?;
        if self.machine.is_registered(user_id) {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let store = self.store().await.ok_or(ServiceError::Degraded)?;
        let registration = Registration {
            session_id: self.machine.id(),
            user_id,
            registered_at: now,
        };
        store
            .insert_registration(RegistrationEntity::from(&registration))
            .await?;

        let outcome = self.machine.register(user_id, now)?;
        self.context
            .hub
            .publish(self.machine.update(now, UpdateKind::Registration));
        Ok(outcome)
    }

    async fn persist_final_score(&self, final_score: u32) {
        let session_id = self.machine.id();
        let mut delay = FINAL_SCORE_RETRY_DELAY;

        for attempt in 1..=FINAL_SCORE_ATTEMPTS {
            let Some(store) = self.store().await else {
                warn!(session_id = %session_id, "no store installed; final score kept in memory");
                return;
            };
            match store
                .record_score(session_id, final_score, Some(final_score))
                .await
            {
                Ok(()) => {
                    info!(session_id = %session_id, final_score, "final score recorded");
                    return;
                }
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        attempt,
                        error = %err,
                        "failed to persist final score"
                    );
                    if attempt < FINAL_SCORE_ATTEMPTS {
                        sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
    }

    async fn store(&self) -> Option<Arc<dyn SessionStore>> {
        self.context.store.read().await.clone()
    }
}
