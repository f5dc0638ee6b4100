//! Per-origin vote rate limiting
//!
//! A strict count-in-window limiter: each origin may make at most
//! `max_attempts` vote attempts in any trailing `window`. Attempts are counted
//! before validation, so junk submissions use up the budget too.

use dashmap::DashMap;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny { retry_after: Duration },
}

/// Sliding-window limiter keyed by origin address
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Origin -> attempt timestamps, oldest first
    attempts: Arc<DashMap<String, VecDeque<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt at `now` unless the origin is already at its cap
    pub fn admit(&self, origin: &str, now: Instant) -> Admission {
        let mut entry = self.attempts.entry(origin.to_string()).or_default();
        prune(&mut entry, now, self.window);

        if entry.len() >= self.max_attempts {
            let retry_after = match entry.front() {
                Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                None => self.window,
            };
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.attempts.remove_if(origin, |_, v| v.is_empty());
            }
            return Admission::Deny { retry_after };
        }

        entry.push_back(now);
        Admission::Allow
    }

    /// Drop stale timestamps everywhere and forget origins with nothing left
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|_, attempts| {
            prune(attempts, now, self.window);
            !attempts.is_empty()
        });
        before.saturating_sub(self.attempts.len())
    }

    /// Number of origins currently tracked
    pub fn tracked_origins(&self) -> usize {
        self.attempts.len()
    }
}

fn prune(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = attempts.front() {
        if now.duration_since(*oldest) >= window {
            attempts.pop_front();
        } else {
            break;
        }
    }
}

/// Spawn the periodic sweep. Runs until `shutdown` is cancelled.
pub fn spawn_sweeper(
    limiter: RateLimiter,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Rate limiter sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = limiter.sweep(Instant::now());
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            remaining = limiter.tracked_origins(),
                            "Swept idle origins from rate limiter"
                        );
                    }
                }
            }
        }
    })
}

/// Anti-abuse configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Vote rate limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
    /// How often idle origins are swept from the limiter
    pub sweep_interval: Duration,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            rate_limiter: Some(RateLimiter::default()),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl AbuseConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let rate_limit_enabled = std::env::var("VOTE_RATE_LIMIT")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let max_attempts = env_number("VOTE_RATE_LIMIT_MAX", DEFAULT_MAX_ATTEMPTS as u64) as usize;
        let window_secs = env_number("VOTE_RATE_LIMIT_WINDOW", DEFAULT_WINDOW.as_secs());
        let sweep_secs = env_number("VOTE_RATE_LIMIT_SWEEP", DEFAULT_SWEEP_INTERVAL.as_secs());

        let rate_limiter = rate_limit_enabled
            .then(|| RateLimiter::new(max_attempts, Duration::from_secs(window_secs)));

        tracing::info!(
            rate_limit_enabled,
            max_attempts,
            window_secs,
            sweep_secs,
            "Anti-abuse config loaded"
        );

        Self {
            rate_limiter,
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        }
    }
}

fn env_number(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default, "Ignoring unparseable number");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_rate_limiter_allows_up_to_cap() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..10 {
            let now = start + Duration::from_secs(i);
            assert_eq!(limiter.admit("1.1.1.1", now), Admission::Allow);
        }

        // 11th within the window is denied until the first attempt ages out
        let now = start + Duration::from_secs(15);
        assert_eq!(
            limiter.admit("1.1.1.1", now),
            Admission::Deny {
                retry_after: Duration::from_secs(45)
            }
        );
    }

    #[test]
    fn test_rate_limiter_different_origins() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.admit("a", now), Admission::Allow);
        assert_eq!(limiter.admit("a", now), Admission::Allow);
        assert!(matches!(limiter.admit("a", now), Admission::Deny { .. }));

        assert_eq!(limiter.admit("b", now), Admission::Allow);
        assert_eq!(limiter.admit("b", now), Admission::Allow);
        assert!(matches!(limiter.admit("b", now), Admission::Deny { .. }));
    }

    #[test]
    fn test_denied_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.admit("a", start), Admission::Allow);
        for i in 1..5 {
            let now = start + Duration::from_secs(i);
            assert!(matches!(limiter.admit("a", now), Admission::Deny { .. }));
        }

        // Only the first attempt counted, so the window frees up at +60s
        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.admit("a", later), Admission::Allow);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.admit("a", start), Admission::Allow);
        assert_eq!(
            limiter.admit("a", start + Duration::from_secs(30)),
            Admission::Allow
        );

        // At +59s both are live
        assert_eq!(
            limiter.admit("a", start + Duration::from_secs(59)),
            Admission::Deny {
                retry_after: Duration::from_secs(1)
            }
        );

        // At +60s the first has aged out, the one at +30s has not
        assert_eq!(
            limiter.admit("a", start + Duration::from_secs(60)),
            Admission::Allow
        );
        assert!(matches!(
            limiter.admit("a", start + Duration::from_secs(61)),
            Admission::Deny { .. }
        ));
    }

    #[test]
    fn test_sweep_removes_idle_origins() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();

        limiter.admit("old", start);
        limiter.admit("fresh", start + Duration::from_secs(50));
        assert_eq!(limiter.tracked_origins(), 2);

        let removed = limiter.sweep(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_origins(), 1);

        limiter.sweep(start + Duration::from_secs(200));
        assert_eq!(limiter.tracked_origins(), 0);
    }

    #[test]
    fn test_zero_cap_denies_without_tracking() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert_eq!(
            limiter.admit("a", Instant::now()),
            Admission::Deny {
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(limiter.tracked_origins(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = spawn_sweeper(
            RateLimiter::default(),
            Duration::from_millis(10),
            token.clone(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .expect("sweeper should not panic");
    }

    #[test]
    fn test_abuse_config_default() {
        let config = AbuseConfig::default();
        assert!(config.rate_limiter.is_some());
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }

    #[test]
    #[serial]
    fn test_abuse_config_from_env() {
        std::env::set_var("VOTE_RATE_LIMIT", "true");
        std::env::set_var("VOTE_RATE_LIMIT_MAX", "3");
        std::env::set_var("VOTE_RATE_LIMIT_WINDOW", "not-a-number");

        let config = AbuseConfig::from_env();
        let limiter = config.rate_limiter.expect("limiter enabled");
        assert_eq!(limiter.window(), DEFAULT_WINDOW);

        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.admit("a", now), Admission::Allow);
        }
        assert!(matches!(limiter.admit("a", now), Admission::Deny { .. }));

        std::env::set_var("VOTE_RATE_LIMIT", "0");
        assert!(AbuseConfig::from_env().rate_limiter.is_none());

        std::env::remove_var("VOTE_RATE_LIMIT");
        std::env::remove_var("VOTE_RATE_LIMIT_MAX");
        std::env::remove_var("VOTE_RATE_LIMIT_WINDOW");
    }

    #[test]
    #[serial]
    fn test_unparseable_tunables_fall_back_to_defaults() {
        std::env::remove_var("VOTE_RATE_LIMIT");
        std::env::set_var("VOTE_RATE_LIMIT_MAX", "ten");
        std::env::set_var("VOTE_RATE_LIMIT_WINDOW", "-5");
        std::env::set_var("VOTE_RATE_LIMIT_SWEEP", "soon");

        let config = AbuseConfig::from_env();
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        let limiter = config.rate_limiter.expect("limiter enabled by default");
        assert_eq!(limiter.window(), DEFAULT_WINDOW);

        let now = Instant::now();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            assert_eq!(limiter.admit("a", now), Admission::Allow);
        }
        assert!(matches!(limiter.admit("a", now), Admission::Deny { .. }));

        std::env::remove_var("VOTE_RATE_LIMIT_MAX");
        std::env::remove_var("VOTE_RATE_LIMIT_WINDOW");
        std::env::remove_var("VOTE_RATE_LIMIT_SWEEP");
    }

    #[test]
    #[serial]
    fn test_zero_sweep_interval_is_clamped() {
        std::env::set_var("VOTE_RATE_LIMIT_SWEEP", "0");
        assert_eq!(AbuseConfig::from_env().sweep_interval, Duration::from_secs(1));
        std::env::remove_var("VOTE_RATE_LIMIT_SWEEP");
    }
}
