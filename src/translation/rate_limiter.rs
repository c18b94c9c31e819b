/*!
 * Process-wide request throttling.
 *
 * One limiter instance is shared by every concurrent job so that the
 * rate-limited endpoint sees at most `requests_per_minute` calls in any
 * sliding 60 second window, spaced by at least `min_interval`.
 */

use log::debug;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::app_config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct LimiterState {
    /// Start times of the requests inside the current window
    window: VecDeque<Instant>,
    /// Start time of the latest request
    last: Option<Instant>,
}

/// Sliding-window rate limiter with a minimum spacing between requests
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: Option<u32>,
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32, min_interval: Duration) -> Self {
        Self {
            max_per_minute: Some(max_per_minute.max(1)),
            min_interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, Duration::from_millis(config.min_interval_ms))
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self {
            max_per_minute: None,
            min_interval: Duration::ZERO,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Wait until a request may be sent and record it
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            while state.window.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                state.window.pop_front();
            }

            let mut wait = Duration::ZERO;
            if let Some(last) = state.last {
                let next = last + self.min_interval;
                if next > now {
                    wait = next - now;
                }
            }
            if let (Some(max), Some(oldest)) = (self.max_per_minute, state.window.front()) {
                if state.window.len() >= max as usize {
                    wait = wait.max((*oldest + WINDOW).saturating_duration_since(now));
                }
            }

            if wait.is_zero() {
                state.window.push_back(now);
                state.last = Some(now);
                return;
            }
            debug!("Rate limiter delaying request by {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests started in the last 60 seconds
    pub async fn requests_in_window(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state.window.iter().filter(|t| now.duration_since(**t) < WINDOW).count()
    }
}
