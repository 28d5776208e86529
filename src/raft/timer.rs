use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a random election timeout within the configured range
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

/// Handle to an armed timer.
///
/// Cancelling stops future deliveries. An event that was already queued before
/// the cancel still carries this handle's id, so the receiver can recognise it
/// as stale by comparing against the id it currently has armed.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    token: CancellationToken,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Idempotent; safe after the timer has fired.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Arm a one-shot timer that delivers `make_event(id)` after a uniformly
/// random delay in `[min_ms, max_ms]`.
pub fn schedule_election_timeout<E, F>(
    min_ms: u64,
    max_ms: u64,
    tx: mpsc::Sender<E>,
    make_event: F,
) -> TimerHandle
where
    E: Send + 'static,
    F: FnOnce(u64) -> E + Send + 'static,
{
    let handle = TimerHandle::new();
    let id = handle.id;
    let token = handle.token.clone();
    let delay = random_election_timeout(min_ms, max_ms);

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = tx.send(make_event(id)).await;
            }
        }
    });

    handle
}

/// Arm a repeating timer that delivers `make_event(id)` every `interval_ms`,
/// starting one interval from now.
pub fn schedule_heartbeat<E, F>(interval_ms: u64, tx: mpsc::Sender<E>, make_event: F) -> TimerHandle
where
    E: Send + 'static,
    F: Fn(u64) -> E + Send + 'static,
{
    let handle = TimerHandle::new();
    let id = handle.id;
    let token = handle.token.clone();
    let period = Duration::from_millis(interval_ms);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(make_event(id)).await.is_err() {
                        // Receiver dropped, stop ticking
                        break;
                    }
                }
            }
        }
    });

    handle
}
