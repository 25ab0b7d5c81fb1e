//! Circuit breaker pattern for provider failure detection.
//!
//! One independent state machine per provider: CLOSED counts consecutive
//! failures, OPEN fast-fails until the next probe time, HALF_OPEN admits a
//! single probe call. Backoff doubles on each failing probe up to a hard cap.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Circuit breaker state for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; failures are counted.
    Closed,
    /// All calls blocked until the next probe time.
    Open,
    /// One probe call allowed; others fast-fail.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// An observable state transition.
#[derive(Debug, Clone)]
pub struct BreakerTransition {
    /// Provider whose breaker moved.
    pub provider: String,
    /// State before the transition.
    pub from: BreakerState,
    /// State after the transition.
    pub to: BreakerState,
    /// Consecutive failure count at transition time.
    pub consecutive_failures: u32,
}

/// Read-only view of one provider's breaker record.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures recorded in CLOSED.
    pub consecutive_failures: u32,
    /// Time remaining until the next probe, when OPEN.
    pub next_probe_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerRecord {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    next_probe: Option<Instant>,
    backoff: Duration,
    probe_in_flight: bool,
}

impl BreakerRecord {
    fn new(initial_backoff: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            next_probe: None,
            backoff: initial_backoff,
            probe_in_flight: false,
        }
    }
}

/// Per-provider circuit breaker with exponential probe backoff.
pub struct CircuitBreaker {
    /// Per-provider records (thread-safe).
    records: Arc<RwLock<HashMap<String, BreakerRecord>>>,
    /// Consecutive failures that trip the breaker (default: 5).
    failure_threshold: u32,
    /// Initial OPEN cooldown (default: 60 seconds).
    initial_backoff: Duration,
    /// Hard cap on the doubled cooldown (default: 300 seconds).
    max_backoff: Duration,
    /// Transition event broadcast.
    events: broadcast::Sender<BreakerTransition>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with default settings.
    ///
    /// Defaults:
    /// - Failure threshold: 5 consecutive failures
    /// - Initial backoff: 60 seconds
    /// - Backoff cap: 300 seconds
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(5, Duration::from_secs(60), Duration::from_secs(300))
    }

    /// Creates a new circuit breaker with custom settings.
    ///
    /// # Arguments
    /// * `failure_threshold` - Consecutive failures before opening
    /// * `initial_backoff` - First OPEN cooldown
    /// * `max_backoff` - Hard cap for the doubled cooldown
    #[must_use]
    pub fn with_settings(
        failure_threshold: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            failure_threshold,
            initial_backoff,
            max_backoff,
            events,
        }
    }

    /// Subscribes to state transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.events.subscribe()
    }

    fn emit(&self, provider: &str, from: BreakerState, to: BreakerState, failures: u32) {
        let _ = self.events.send(BreakerTransition {
            provider: provider.to_string(),
            from,
            to,
            consecutive_failures: failures,
        });
    }

    /// Asks permission to dispatch a call to the provider.
    ///
    /// Returns `false` while the breaker is OPEN (fast fail, no network) and
    /// for all but the first caller in HALF_OPEN. An OPEN breaker whose probe
    /// time has arrived transitions to HALF_OPEN here and admits the caller
    /// as the probe.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let mut records = self.records.write().unwrap();
        let record = records
            .entry(provider.to_string())
            .or_insert_with(|| BreakerRecord::new(self.initial_backoff));

        match record.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let probe_due =
                    record.next_probe.map(|at| Instant::now() >= at).unwrap_or(true);
                if probe_due {
                    record.state = BreakerState::HalfOpen;
                    record.probe_in_flight = true;
                    debug!(provider = provider, "Circuit breaker: Open -> HalfOpen (probe admitted)");
                    let failures = record.consecutive_failures;
                    drop(records);
                    self.emit(provider, BreakerState::Open, BreakerState::HalfOpen, failures);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if record.probe_in_flight {
                    false
                } else {
                    record.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a successful call for a provider.
    ///
    /// Resets the consecutive failure counter; a successful HALF_OPEN probe
    /// closes the circuit and restores the initial backoff.
    pub fn record_success(&self, provider: &str) {
        let mut transition = None;
        {
            let mut records = self.records.write().unwrap();
            let record = records
                .entry(provider.to_string())
                .or_insert_with(|| BreakerRecord::new(self.initial_backoff));

            record.consecutive_failures = 0;
            if record.state == BreakerState::HalfOpen {
                record.state = BreakerState::Closed;
                record.opened_at = None;
                record.next_probe = None;
                record.backoff = self.initial_backoff;
                record.probe_in_flight = false;
                debug!(provider = provider, "Circuit breaker: HalfOpen -> Closed (recovery successful)");
                transition = Some((BreakerState::HalfOpen, BreakerState::Closed));
            }
        }
        if let Some((from, to)) = transition {
            self.emit(provider, from, to, 0);
        }
    }

    /// Records a failed call for a provider.
    ///
    /// In CLOSED the consecutive counter increments and trips the breaker at
    /// the threshold. A failed HALF_OPEN probe reopens with doubled backoff,
    /// capped at the maximum.
    pub fn record_failure(&self, provider: &str) {
        let mut transition = None;
        {
            let mut records = self.records.write().unwrap();
            let record = records
                .entry(provider.to_string())
                .or_insert_with(|| BreakerRecord::new(self.initial_backoff));

            match record.state {
                BreakerState::Closed => {
                    record.consecutive_failures += 1;
                    if record.consecutive_failures >= self.failure_threshold {
                        record.state = BreakerState::Open;
                        record.opened_at = Some(Instant::now());
                        record.next_probe = Some(Instant::now() + record.backoff);
                        warn!(
                            provider = provider,
                            consecutive_failures = record.consecutive_failures,
                            backoff_secs = record.backoff.as_secs(),
                            "Circuit breaker: Closed -> Open (failure threshold reached)"
                        );
                        transition = Some((
                            BreakerState::Closed,
                            BreakerState::Open,
                            record.consecutive_failures,
                        ));
                    }
                }
                BreakerState::HalfOpen => {
                    record.backoff = (record.backoff * 2).min(self.max_backoff);
                    record.state = BreakerState::Open;
                    record.opened_at = Some(Instant::now());
                    record.next_probe = Some(Instant::now() + record.backoff);
                    record.probe_in_flight = false;
                    warn!(
                        provider = provider,
                        backoff_secs = record.backoff.as_secs(),
                        "Circuit breaker: HalfOpen -> Open (probe failed)"
                    );
                    transition = Some((
                        BreakerState::HalfOpen,
                        BreakerState::Open,
                        record.consecutive_failures,
                    ));
                }
                BreakerState::Open => {
                    // Late failure from a call dispatched before opening.
                }
            }
        }
        if let Some((from, to, failures)) = transition {
            self.emit(provider, from, to, failures);
        }
    }

    /// Returns an admitted-but-abandoned probe slot without recording an
    /// outcome (cancellation is neither success nor failure).
    pub fn release_probe(&self, provider: &str) {
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(provider) {
            if record.state == BreakerState::HalfOpen {
                record.probe_in_flight = false;
            }
        }
    }

    /// Gets the current state for a provider, applying any due
    /// OPEN → HALF_OPEN transition first.
    pub fn state(&self, provider: &str) -> BreakerState {
        let mut records = self.records.write().unwrap();
        let record = records
            .entry(provider.to_string())
            .or_insert_with(|| BreakerRecord::new(self.initial_backoff));
        if record.state == BreakerState::Open {
            let probe_due = record.next_probe.map(|at| Instant::now() >= at).unwrap_or(true);
            if probe_due {
                record.state = BreakerState::HalfOpen;
                record.probe_in_flight = false;
            }
        }
        record.state
    }

    /// Whether routing should exclude this provider right now.
    ///
    /// OPEN (with a pending probe time) excludes; CLOSED and HALF_OPEN do not.
    pub fn is_open(&self, provider: &str) -> bool {
        self.state(provider) == BreakerState::Open
    }

    /// Observability snapshot for a provider.
    pub fn snapshot(&self, provider: &str) -> BreakerSnapshot {
        let records = self.records.read().unwrap();
        match records.get(provider) {
            Some(record) => BreakerSnapshot {
                state: record.state,
                consecutive_failures: record.consecutive_failures,
                next_probe_in: record
                    .next_probe
                    .map(|at| at.saturating_duration_since(Instant::now())),
            },
            None => BreakerSnapshot {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                next_probe_in: None,
            },
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::with_settings(5, Duration::from_millis(100), Duration::from_millis(400))
    }

    #[test]
    fn test_breaker_starts_closed() {
        let breaker = CircuitBreaker::new();
        assert_eq!(breaker.state("groq"), BreakerState::Closed);
        assert!(breaker.try_acquire("groq"));
    }

    #[test]
    fn test_opens_after_five_consecutive_failures() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure("groq");
        }
        assert_eq!(breaker.state("groq"), BreakerState::Closed);

        breaker.record_failure("groq");
        assert_eq!(breaker.state("groq"), BreakerState::Open);
        // The very next call is refused without touching the network.
        assert!(!breaker.try_acquire("groq"));
    }

    #[test]
    fn test_success_resets_consecutive_counter() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure("groq");
        }
        breaker.record_success("groq");
        for _ in 0..4 {
            breaker.record_failure("groq");
        }
        // 4 + 4 failures with a success in between never trips the breaker.
        assert_eq!(breaker.state("groq"), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("groq");
        }
        assert!(!breaker.try_acquire("groq"));

        thread::sleep(Duration::from_millis(150));

        // First caller becomes the probe, second fast-fails.
        assert!(breaker.try_acquire("groq"));
        assert_eq!(breaker.state("groq"), BreakerState::HalfOpen);
        assert!(!breaker.try_acquire("groq"));
    }

    #[test]
    fn test_successful_probe_closes_circuit() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("groq");
        }
        thread::sleep(Duration::from_millis(150));
        assert!(breaker.try_acquire("groq"));

        breaker.record_success("groq");
        assert_eq!(breaker.state("groq"), BreakerState::Closed);
        assert_eq!(breaker.snapshot("groq").consecutive_failures, 0);
        assert!(breaker.try_acquire("groq"));
    }

    #[test]
    fn test_failed_probe_doubles_backoff() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("groq");
        }
        thread::sleep(Duration::from_millis(150));
        assert!(breaker.try_acquire("groq"));
        breaker.record_failure("groq");
        assert_eq!(breaker.state("groq"), BreakerState::Open);

        // Backoff doubled to 200ms: still open after the original 100ms.
        thread::sleep(Duration::from_millis(120));
        assert!(!breaker.try_acquire("groq"));
        thread::sleep(Duration::from_millis(120));
        assert!(breaker.try_acquire("groq"));
    }

    #[test]
    fn test_backoff_is_capped() {
        let breaker =
            CircuitBreaker::with_settings(1, Duration::from_millis(100), Duration::from_millis(200));
        breaker.record_failure("groq");
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(220));
            assert!(breaker.try_acquire("groq"));
            breaker.record_failure("groq");
        }
        // After many failing probes the cooldown never exceeds the cap.
        thread::sleep(Duration::from_millis(220));
        assert!(breaker.try_acquire("groq"));
    }

    #[test]
    fn test_providers_are_independent() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure("groq");
        }
        assert_eq!(breaker.state("groq"), BreakerState::Open);
        assert_eq!(breaker.state("openai"), BreakerState::Closed);
        assert!(breaker.try_acquire("openai"));
    }

    #[tokio::test]
    async fn test_transitions_are_observable() {
        let breaker = fast_breaker();
        let mut events = breaker.subscribe();
        for _ in 0..5 {
            breaker.record_failure("groq");
        }
        let event = events.recv().await.unwrap();
        assert_eq!(event.provider, "groq");
        assert_eq!(event.from, BreakerState::Closed);
        assert_eq!(event.to, BreakerState::Open);
        assert_eq!(event.consecutive_failures, 5);
    }
}
