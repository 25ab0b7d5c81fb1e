//! Sliding-window rate limiting keyed on (principal, role).

use crate::config::RateLimitSettings;
use crate::error::OrchestrationError;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Caller role, selecting the hourly quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Unauthenticated demo caller.
    Demo,
    /// Authenticated user.
    Authenticated,
    /// Administrator.
    Admin,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "demo" => Ok(Self::Demo),
            "authenticated" | "user" => Ok(Self::Authenticated),
            "admin" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "demo"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Sliding 1-hour window counter per (principal, role).
///
/// Increment-and-read is atomic under one lock; expired entries are pruned
/// lazily on read, so an idle process carries no timers.
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, Role), VecDeque<Instant>>>,
    limits: RateLimitSettings,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the given per-role quotas and a 1-hour window.
    #[must_use]
    pub fn new(limits: RateLimitSettings) -> Self {
        Self::with_window(limits, Duration::from_secs(3600))
    }

    /// Creates a limiter with a custom window (tests shrink this).
    #[must_use]
    pub fn with_window(limits: RateLimitSettings, window: Duration) -> Self {
        Self { windows: Mutex::new(HashMap::new()), limits, window }
    }

    fn limit_for(&self, role: Role) -> u32 {
        match role {
            Role::Demo => self.limits.demo_per_hour,
            Role::Authenticated => self.limits.authenticated_per_hour,
            Role::Admin => self.limits.admin_per_hour,
        }
    }

    /// Records one request if the quota allows it.
    ///
    /// # Errors
    /// Returns `OrchestrationError::RateLimited` with the seconds until the
    /// oldest window entry expires when the quota is exhausted.
    pub async fn check(&self, principal: &str, role: Role) -> Result<(), OrchestrationError> {
        let limit = self.limit_for(role);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entries = windows.entry((principal.to_string(), role)).or_default();

        // Lazy expiry on read.
        while entries.front().map(|&at| now.duration_since(at) >= self.window).unwrap_or(false) {
            entries.pop_front();
        }

        if entries.len() as u32 >= limit {
            // A zero quota has no oldest entry to expire; the full window applies.
            let retry_after = match entries.front() {
                Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                None => self.window,
            };
            let retry_after_secs = retry_after.as_secs().clamp(1, 3600);
            debug!(
                principal = principal,
                role = %role,
                limit = limit,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(OrchestrationError::RateLimited { retry_after_secs });
        }

        entries.push_back(now);
        Ok(())
    }

    /// Requests left in the current window for a caller.
    pub async fn remaining(&self, principal: &str, role: Role) -> u32 {
        let limit = self.limit_for(role);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entries = windows.entry((principal.to_string(), role)).or_default();
        while entries.front().map(|&at| now.duration_since(at) >= self.window).unwrap_or(false) {
            entries.pop_front();
        }
        limit.saturating_sub(entries.len() as u32)
    }
}
