use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use chatrelay_core::{ReconnectEpisode, ReconnectPolicy};
use tokio_util::sync::CancellationToken;

/// Schedules and bounds automatic reconnection attempts.
///
/// Decides *whether* to retry; the actual connect call stays with the
/// session manager. All episode state lives under this engine's own lock,
/// distinct from the connection lock, so a timer firing into `connect`
/// never deadlocks against the code path that scheduled it. No lock is held
/// while the decision is returned to the caller.
pub struct ReconnectEngine {
    policy: ReconnectPolicy,
    inner: Mutex<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    episode: Option<ReconnectEpisode>,
    /// Token guarding the currently pending one-shot timer, if any.
    timer: Option<CancellationToken>,
    gave_up: bool,
}

impl ReconnectEngine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(EngineInner::default()),
        }
    }

    /// Record a connection loss and decide on the next attempt.
    ///
    /// Opens an episode when none is running, cancels any pending timer,
    /// and returns `(delay, token)` for the one-shot timer the caller must
    /// arm. Returns `None` when the episode's attempt or wall-clock budget
    /// is exhausted; the episode then stays open but inert until the next
    /// successful connection.
    pub fn next_attempt(&self, now: Instant) -> Option<(Duration, CancellationToken)> {
        let mut inner = self.lock();
        if let Some(pending) = inner.timer.take() {
            pending.cancel();
        }

        let policy = self.policy;
        let episode = inner
            .episode
            .get_or_insert_with(|| ReconnectEpisode::open(&policy, now));

        match policy.next_delay(episode, now) {
            Some(delay) => {
                let token = CancellationToken::new();
                inner.timer = Some(token.clone());
                inner.gave_up = false;
                Some((delay, token))
            }
            None => {
                inner.gave_up = true;
                None
            }
        }
    }

    /// A connection was established: discard the episode and cancel any
    /// timer that is still pending.
    pub fn on_connected(&self) {
        let mut inner = self.lock();
        inner.episode = None;
        inner.gave_up = false;
        if let Some(pending) = inner.timer.take() {
            pending.cancel();
        }
    }

    /// Cancel any pending timer without touching the episode. Used by
    /// `close` so a fired timer can never resurrect the connection.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(pending) = inner.timer.take() {
            pending.cancel();
        }
    }

    /// Whether the current episode hit a terminal give-up condition.
    pub fn gave_up(&self) -> bool {
        self.lock().gave_up
    }

    /// Whether a reconnect timer is currently armed.
    pub fn timer_pending(&self) -> bool {
        self.lock().timer.is_some()
    }

    /// Attempts made in the current episode, if one is open.
    pub fn episode_attempts(&self) -> Option<u32> {
        self.lock().episode.as_ref().map(|e| e.attempts())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
