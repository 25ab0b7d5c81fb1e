//! Per-request progress streaming with replay and heartbeat.
//!
//! Every pipeline stage publishes ordered messages to a per-request mailbox.
//! Subscribers receive buffered history (replay) followed by live messages;
//! acknowledged messages are pruned and never redelivered.
//!
//! Sequence numbers are dense (1, 2, 3, …) per request and assigned at
//! publish time. Transient per-subscription messages (the connection
//! greeting and heartbeats) carry seq 0 and are never buffered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Kinds of progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Greeting pushed to a new subscription (transient).
    ConnectionEstablished,
    /// Keepalive on active subscriptions (transient).
    Heartbeat,
    /// Analysis stage entered.
    AnalysisStarted,
    /// Analysis stage finished; payload carries the verbatim analysis.
    AnalysisComplete,
    /// Decomposer produced the subtask list.
    DecompositionComplete,
    /// Router bound every subtask to a model.
    RoutingComplete,
    /// One subtask finished (or fell back).
    ExecutionProgress,
    /// The arbiter resolved competing responses.
    ArbitrationDecision,
    /// Synthesis stage entered.
    SynthesisStarted,
    /// Final response available.
    FinalResponse,
    /// A stage failed.
    Error,
    /// The request was cancelled; no further messages follow.
    Cancelled,
}

impl ProgressKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::Heartbeat => "heartbeat",
            Self::AnalysisStarted => "analysis_started",
            Self::AnalysisComplete => "analysis_complete",
            Self::DecompositionComplete => "decomposition_complete",
            Self::RoutingComplete => "routing_complete",
            Self::ExecutionProgress => "execution_progress",
            Self::ArbitrationDecision => "arbitration_decision",
            Self::SynthesisStarted => "synthesis_started",
            Self::FinalResponse => "final_response",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One progress message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Dense per-request sequence number; 0 for transient messages.
    pub seq: u64,
    /// Message kind.
    pub kind: ProgressKind,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A live subscription to one request's progress.
pub struct Subscription {
    /// Subscription id, used for heartbeat responses.
    pub id: u64,
    /// Ordered message stream: replay first, then live.
    pub receiver: mpsc::UnboundedReceiver<ProgressMessage>,
}

struct SubscriberHandle {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressMessage>,
    last_activity: Instant,
}

struct Mailbox {
    next_seq: u64,
    buffer: VecDeque<(ProgressMessage, Instant)>,
    acked: u64,
    subscribers: Vec<SubscriberHandle>,
    closed: bool,
}

impl Mailbox {
    fn new() -> Self {
        Self { next_seq: 1, buffer: VecDeque::new(), acked: 0, subscribers: Vec::new(), closed: false }
    }
}

/// Per-request ordered, resumable progress bus.
pub struct ProgressBus {
    mailboxes: Mutex<HashMap<Uuid, Mailbox>>,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
    message_ttl: Duration,
    subscriber_ids: AtomicU64,
}

impl ProgressBus {
    /// Creates a bus with production settings: 30s heartbeat, 300s idle
    /// timeout, 24h unacked message TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(
            Duration::from_secs(30),
            Duration::from_secs(300),
            Duration::from_secs(24 * 3600),
        )
    }

    /// Creates a bus with custom intervals (tests shrink these).
    #[must_use]
    pub fn with_settings(
        heartbeat_interval: Duration,
        idle_timeout: Duration,
        message_ttl: Duration,
    ) -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            heartbeat_interval,
            idle_timeout,
            message_ttl,
            subscriber_ids: AtomicU64::new(1),
        }
    }

    /// Publishes a message, assigning the next sequence number.
    ///
    /// The message is buffered until acknowledged and pushed to every live
    /// subscriber. Publishing to a cancelled (closed) mailbox is a no-op
    /// returning 0, preserving "no messages after `cancelled`".
    pub async fn publish(
        &self,
        request_id: Uuid,
        kind: ProgressKind,
        payload: serde_json::Value,
    ) -> u64 {
        let mut mailboxes = self.mailboxes.lock().await;
        let mailbox = mailboxes.entry(request_id).or_insert_with(Mailbox::new);
        if mailbox.closed {
            return 0;
        }

        let seq = mailbox.next_seq;
        mailbox.next_seq += 1;

        let message = ProgressMessage { seq, kind, payload, created_at: Utc::now() };
        mailbox.buffer.push_back((message.clone(), Instant::now()));
        mailbox.subscribers.retain(|s| s.tx.send(message.clone()).is_ok());

        debug!(request_id = %request_id, seq = seq, kind = kind.as_str(), "Progress published");

        if kind == ProgressKind::Cancelled {
            mailbox.closed = true;
        }
        seq
    }

    /// Subscribes to a request's progress from a given sequence number.
    ///
    /// Buffered messages with `seq > since_seq` are delivered first, in
    /// order, followed by live messages. Resubscribing with the last
    /// acknowledged sequence resumes exactly where the subscriber left off.
    pub async fn subscribe(&self, request_id: Uuid, since_seq: u64) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscriber_ids.fetch_add(1, Ordering::Relaxed);

        let greeting = ProgressMessage {
            seq: 0,
            kind: ProgressKind::ConnectionEstablished,
            payload: json!({ "request_id": request_id, "resumed_from": since_seq }),
            created_at: Utc::now(),
        };
        let _ = tx.send(greeting);

        let mut mailboxes = self.mailboxes.lock().await;
        let mailbox = mailboxes.entry(request_id).or_insert_with(Mailbox::new);
        for (message, _) in mailbox.buffer.iter().filter(|(m, _)| m.seq > since_seq) {
            let _ = tx.send(message.clone());
        }
        mailbox.subscribers.push(SubscriberHandle { id, tx, last_activity: Instant::now() });

        Subscription { id, receiver: rx }
    }

    /// Acknowledges receipt of messages up to and including `seq`.
    ///
    /// Acknowledged messages are pruned and never redelivered. The ack also
    /// counts as subscriber activity for the idle timeout.
    pub async fn acknowledge(&self, request_id: Uuid, seq: u64) {
        let mut mailboxes = self.mailboxes.lock().await;
        if let Some(mailbox) = mailboxes.get_mut(&request_id) {
            mailbox.acked = mailbox.acked.max(seq);
            while mailbox.buffer.front().map(|(m, _)| m.seq <= seq).unwrap_or(false) {
                mailbox.buffer.pop_front();
            }
            let now = Instant::now();
            for subscriber in &mut mailbox.subscribers {
                subscriber.last_activity = now;
            }
        }
    }

    /// Records a heartbeat response from one subscription.
    pub async fn heartbeat_response(&self, request_id: Uuid, subscription_id: u64) {
        let mut mailboxes = self.mailboxes.lock().await;
        if let Some(mailbox) = mailboxes.get_mut(&request_id) {
            if let Some(subscriber) =
                mailbox.subscribers.iter_mut().find(|s| s.id == subscription_id)
            {
                subscriber.last_activity = Instant::now();
            }
        }
    }

    /// Highest sequence number assigned for a request so far.
    pub async fn last_seq(&self, request_id: Uuid) -> u64 {
        let mailboxes = self.mailboxes.lock().await;
        mailboxes.get(&request_id).map(|m| m.next_seq - 1).unwrap_or(0)
    }

    /// Runs one maintenance sweep: heartbeats, idle eviction, TTL pruning.
    ///
    /// Exposed for tests; production drives it through `start_maintenance`.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut mailboxes = self.mailboxes.lock().await;
        for mailbox in mailboxes.values_mut() {
            // Expire unacked messages past their TTL.
            while mailbox
                .buffer
                .front()
                .map(|(_, at)| now.duration_since(*at) > self.message_ttl)
                .unwrap_or(false)
            {
                mailbox.buffer.pop_front();
            }

            // Drop idle or disconnected subscribers, heartbeat the rest.
            let idle_timeout = self.idle_timeout;
            mailbox.subscribers.retain(|s| {
                !s.tx.is_closed() && now.duration_since(s.last_activity) <= idle_timeout
            });
            let heartbeat = ProgressMessage {
                seq: 0,
                kind: ProgressKind::Heartbeat,
                payload: json!({}),
                created_at: Utc::now(),
            };
            for subscriber in &mailbox.subscribers {
                let _ = subscriber.tx.send(heartbeat.clone());
            }
        }
    }

    /// Spawns the background maintenance loop.
    pub fn start_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(bus.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                bus.sweep().await;
            }
        })
    }

    /// Removes a request's mailbox entirely (history retention elsewhere).
    pub async fn remove(&self, request_id: Uuid) {
        let mut mailboxes = self.mailboxes.lock().await;
        mailboxes.remove(&request_id);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
