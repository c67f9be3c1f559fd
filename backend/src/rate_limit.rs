use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 10;
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Sliding one-minute admission gate shared by every pipeline run that talks
/// to the AI service. Construct once and hand out `Arc<RateLimiter>`.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests_per_minute: u32,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self::new_at(max_requests_per_minute, Instant::now())
    }

    /// Limiter whose first window opens at `window_start`.
    pub fn new_at(max_requests_per_minute: u32, window_start: Instant) -> Self {
        Self {
            max_requests_per_minute,
            window: Mutex::new(RateWindow {
                window_start,
                count: 0,
            }),
        }
    }

    pub fn max_requests_per_minute(&self) -> u32 {
        self.max_requests_per_minute
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        // A poisoned lock only means another run panicked mid-increment; the
        // counter itself is still usable.
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if now.saturating_duration_since(window.window_start) > WINDOW {
            window.window_start = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        let admitted = window.count <= self.max_requests_per_minute;
        if !admitted {
            log::warn!(
                "AI request rejected: {} requests in current window (limit {})",
                window.count,
                self.max_requests_per_minute
            );
        }
        admitted
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS_PER_MINUTE)
    }
}
