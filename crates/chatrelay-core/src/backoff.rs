use std::time::{Duration, Instant};

/// Hard ceiling on the backoff delay regardless of configuration.
pub const MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Bounds for a reconnect episode.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    initial_interval: Duration,
    /// Attempt budget per episode. Zero means unbounded.
    max_attempts: u32,
    /// Wall-clock budget per episode. Zero means unbounded.
    max_elapsed: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial_interval: Duration, max_attempts: u32, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_attempts,
            max_elapsed,
        }
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Advance the episode by one attempt and return the delay before it.
    ///
    /// Returns `None` when either budget is exhausted: the episode stays
    /// open but inert until a successful connection discards it. The first
    /// attempt waits the initial interval; every later attempt doubles the
    /// delay, capped at [`MAX_RECONNECT_INTERVAL`].
    pub fn next_delay(&self, episode: &mut ReconnectEpisode, now: Instant) -> Option<Duration> {
        if self.max_attempts > 0 && episode.attempts >= self.max_attempts {
            return None;
        }
        if !self.max_elapsed.is_zero() && now.duration_since(episode.started_at) > self.max_elapsed
        {
            return None;
        }

        episode.attempts += 1;
        if episode.attempts > 1 {
            episode.current_interval =
                (episode.current_interval * 2).min(MAX_RECONNECT_INTERVAL);
        }
        Some(episode.current_interval)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 0, Duration::ZERO)
    }
}

/// Transient bookkeeping for one contiguous run of reconnect attempts.
///
/// Created on the first disconnect after a successful connection and
/// discarded on the next successful connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectEpisode {
    attempts: u32,
    current_interval: Duration,
    started_at: Instant,
}

impl ReconnectEpisode {
    pub fn open(policy: &ReconnectPolicy, now: Instant) -> Self {
        Self {
            attempts: 0,
            current_interval: policy.initial_interval(),
            started_at: now,
        }
    }

    /// Attempts made since the episode opened.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Timestamp of the first failure in this episode.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_delay_after_first_attempt() {
        let policy = ReconnectPolicy::new(Duration::from_secs(2), 0, Duration::ZERO);
        let now = Instant::now();
        let mut episode = ReconnectEpisode::open(&policy, now);

        assert_eq!(policy.next_delay(&mut episode, now), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(&mut episode, now), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(&mut episode, now), Some(Duration::from_secs(8)));
        assert_eq!(policy.next_delay(&mut episode, now), Some(Duration::from_secs(16)));
    }

    #[test]
    fn caps_delay_at_five_minutes() {
        let policy = ReconnectPolicy::new(Duration::from_secs(200), 0, Duration::ZERO);
        let now = Instant::now();
        let mut episode = ReconnectEpisode::open(&policy, now);

        policy.next_delay(&mut episode, now);
        assert_eq!(policy.next_delay(&mut episode, now), Some(MAX_RECONNECT_INTERVAL));
        assert_eq!(policy.next_delay(&mut episode, now), Some(MAX_RECONNECT_INTERVAL));
    }

    #[test]
    fn stops_after_attempt_budget() {
        let policy = ReconnectPolicy::new(Duration::from_secs(2), 3, Duration::ZERO);
        let now = Instant::now();
        let mut episode = ReconnectEpisode::open(&policy, now);

        assert!(policy.next_delay(&mut episode, now).is_some());
        assert!(policy.next_delay(&mut episode, now).is_some());
        assert!(policy.next_delay(&mut episode, now).is_some());
        assert_eq!(policy.next_delay(&mut episode, now), None);
        assert_eq!(episode.attempts(), 3);
    }

    #[test]
    fn stops_after_wall_clock_budget() {
        let policy =
            ReconnectPolicy::new(Duration::from_secs(2), 0, Duration::from_secs(60));
        let start = Instant::now();
        let mut episode = ReconnectEpisode::open(&policy, start);

        assert!(policy
            .next_delay(&mut episode, start + Duration::from_secs(59))
            .is_some());
        assert_eq!(
            policy.next_delay(&mut episode, start + Duration::from_secs(61)),
            None
        );
    }

    #[test]
    fn fresh_episode_restarts_at_initial_interval() {
        let policy = ReconnectPolicy::new(Duration::from_secs(2), 0, Duration::ZERO);
        let now = Instant::now();
        let mut episode = ReconnectEpisode::open(&policy, now);
        policy.next_delay(&mut episode, now);
        policy.next_delay(&mut episode, now);

        // A successful connection discards the episode; the next failure
        // opens a fresh one.
        let mut fresh = ReconnectEpisode::open(&policy, now);
        assert_eq!(policy.next_delay(&mut fresh, now), Some(Duration::from_secs(2)));
    }
}
