use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    services::recovery,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const MAX_JITTER_MS: u64 = 250;

/// Reconnect to the storage backend and keep the shared state in degraded mode when it is unavailable.
///
/// Every time a store becomes usable the unfinished sessions are restored.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                activate(&state, &store).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => sleep(HEALTH_POLL_INTERVAL).await,
                        Err(err) => {
                            warn!(error = %err, "storage health check failed");
                            if reconnect(&state, &store).await {
                                activate(&state, &store).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                            } else {
                                warn!(
                                    "exhausted storage reconnect attempts; staying in degraded mode"
                                );
                                break;
                            }
                        }
                    }
                }

                sleep(with_jitter(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(with_jitter(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Install `store` and bring back the sessions it holds.
pub async fn activate(state: &SharedState, store: &Arc<dyn SessionStore>) {
    state.install_store(Arc::clone(store)).await;
    if let Err(err) = recovery::recover(state, store).await {
        warn!(error = %err, "session recovery failed; will retry on next reconnection");
    }
}

/// Try to revive the connection of `store`, entering degraded mode after the first failure.
async fn reconnect(state: &SharedState, store: &Arc<dyn SessionStore>) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(reconnect_err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %reconnect_err,
                        "storage reconnect first attempt failed; entering in degraded mode"
                    );
                    state.clear_store().await;
                } else {
                    warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                }
                sleep(with_jitter(reconnect_delay)).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

fn with_jitter(delay: Duration) -> Duration {
    delay + Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore, state::AppState,
    };

    #[test]
    fn jitter_stays_bounded() {
        for _ in 0..100 {
            let delayed = with_jitter(INITIAL_DELAY);
            assert!(delayed >= INITIAL_DELAY);
            assert!(delayed <= INITIAL_DELAY + Duration::from_millis(MAX_JITTER_MS));
        }
    }

    #[tokio::test]
    async fn first_successful_connection_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>)
            }
        }));

        watcher.changed().await.unwrap();
        assert!(!*watcher.borrow());
        assert!(!state.is_degraded().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        supervisor.abort();
    }
}
