//! Command pipeline
//!
//! A bounded FIFO of `(frame, completion)` items consumed by a single worker
//! that owns the [`Transport`]. The worker enforces the radio-link protocol:
//! exactly one frame in flight, a drain of stale bytes before every send,
//! a 1200 ms one-byte ACK deadline, bounded retries, a 25 ms inter-frame gap
//! and the 1 cmd/s rate ceiling the downstream radio requires.
//!
//! Effectively a stop-and-wait ARQ with one-byte ACKs. Because the queue is
//! drained before each send, a received `K` always belongs to the most
//! recently sent frame.
//!
//! Every accepted item's completion resolves exactly once: with the attempt
//! outcome, with a failure when [`PipelineHandle::clear_queue`] cancels it,
//! or with a failure when the worker shuts down.

use super::frame::Frame;
use super::health::{ConnectionStatus, HealthSnapshot, HealthTable};
use super::transport::{Transport, TransportError};
use crate::config::GatewayConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// ACK byte the edge bridge forwards after a field device confirms a frame.
pub const ACK_BYTE: u8 = b'K';

/// Per-frame result record.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub ok: bool,
    /// Failed attempts before the final result (0 on first-try success).
    pub retries: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    fn failure(retries: u32, elapsed_ms: u64, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            retries,
            elapsed_ms,
            error: Some(error.into()),
        }
    }
}

struct QueueItem {
    frame: Frame,
    done: oneshot::Sender<Outcome>,
    enqueued_at: Instant,
}

struct Shared {
    queue: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    health: Mutex<HealthTable>,
    connected: AtomicBool,
    capacity: usize,
}

impl Shared {
    fn fail_item(item: QueueItem, error: &str) {
        let elapsed_ms = item.enqueued_at.elapsed().as_millis() as u64;
        let _ = item.done.send(Outcome::failure(0, elapsed_ms, error));
    }
}

/// Cloneable producer side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    guard: Duration,
}

impl PipelineHandle {
    /// Enqueue a frame and wait for its outcome.
    ///
    /// The wait is bounded by the overall request guard; a guard timeout
    /// resolves the caller with a failure while the worker may still be
    /// driving the frame (its late completion is then discarded).
    pub async fn send_frame(&self, frame: Frame) -> Outcome {
        let started = Instant::now();
        let (tx, rx) = oneshot::channel();

        {
            let mut queue = match self.shared.queue.lock() {
                Ok(q) => q,
                Err(poisoned) => poisoned.into_inner(),
            };
            if queue.len() >= self.shared.capacity {
                warn!(frame = %frame, depth = queue.len(), "Command queue full, rejecting frame");
                return Outcome::failure(0, 0, "command queue full");
            }
            queue.push_back(QueueItem {
                frame,
                done: tx,
                enqueued_at: started,
            });
        }
        self.shared.notify.notify_one();

        match tokio::time::timeout(self.guard, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Outcome::failure(
                0,
                started.elapsed().as_millis() as u64,
                "pipeline worker stopped",
            ),
            Err(_) => Outcome::failure(
                0,
                started.elapsed().as_millis() as u64,
                "request guard timeout",
            ),
        }
    }

    /// Drain all pending items, resolving each with a failed outcome.
    /// Returns the number of cancelled commands. Used by the changeover and
    /// deactivation protocols to stop stale frames from reaching the field.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<QueueItem> = {
            let mut queue = match self.shared.queue.lock() {
                Ok(q) => q,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.drain(..).collect()
        };

        let cleared = drained.len();
        for item in drained {
            Shared::fail_item(item, "cancelled: queue cleared");
        }
        if cleared > 0 {
            warn!(cleared, "Cleared pending commands from queue");
        }
        cleared
    }

    pub fn queue_depth(&self) -> usize {
        match self.shared.queue.lock() {
            Ok(q) => q.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let health = match self.shared.health.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        health.snapshot(self.is_connected(), self.queue_depth())
    }
}

/// Single consumer that owns the transport. Run it with
/// [`PipelineWorker::run`] on its own task.
pub struct PipelineWorker {
    shared: Arc<Shared>,
    transport: Transport,
    config: GatewayConfig,
    /// Reconnect backoff, persisted across items, reset on success.
    reconnect_delay: Duration,
    last_attempt_at: Option<Instant>,
}

/// Build a pipeline: the handle for producers and the worker to spawn.
pub fn channel(config: GatewayConfig) -> (PipelineHandle, PipelineWorker) {
    let transport = Transport::new(
        &config.host,
        config.port,
        Duration::from_secs(config.connect_timeout_secs),
    );
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        health: Mutex::new(HealthTable::default()),
        connected: AtomicBool::new(false),
        capacity: config.queue_capacity,
    });

    let handle = PipelineHandle {
        shared: Arc::clone(&shared),
        guard: config.request_guard(),
    };
    let worker = PipelineWorker {
        shared,
        transport,
        reconnect_delay: Duration::from_millis(config.reconnect_initial_ms),
        last_attempt_at: None,
        config,
    };
    (handle, worker)
}

impl PipelineWorker {
    /// Worker loop. Exits when `cancel` fires, failing any still-queued
    /// items on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Gateway command worker running");

        loop {
            let item = tokio::select! {
                item = self.next_item() => item,
                _ = cancel.cancelled() => break,
            };

            // Block on connectivity before touching the frame; backoff grows
            // 50 ms -> 2 s and resets on success.
            if !self.wait_connected(&cancel).await {
                Shared::fail_item(item, "shutting down");
                break;
            }

            self.throttle().await;

            let outcome = self.drive_frame(&item.frame, item.enqueued_at).await;
            self.record_result(&item.frame, &outcome);

            let _ = item.done.send(outcome);

            // Inter-frame gap keeps the radio link from flooding.
            tokio::time::sleep(self.config.inter_frame_gap()).await;
        }

        info!("Gateway command worker stopping");
        self.transport.close();
        self.shared.connected.store(false, Ordering::Relaxed);
        for item in self.drain_pending() {
            Shared::fail_item(item, "shutting down");
        }
    }

    async fn next_item(&self) -> QueueItem {
        loop {
            {
                let mut queue = match self.shared.queue.lock() {
                    Ok(q) => q,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    fn drain_pending(&self) -> Vec<QueueItem> {
        let mut queue = match self.shared.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.drain(..).collect()
    }

    /// Reconnect loop with exponential backoff. Returns false on shutdown.
    async fn wait_connected(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            match self.transport.ensure_connected().await {
                Ok(()) => {
                    self.shared.connected.store(true, Ordering::Relaxed);
                    self.reconnect_delay = Duration::from_millis(self.config.reconnect_initial_ms);
                    return true;
                }
                Err(e) => {
                    self.shared.connected.store(false, Ordering::Relaxed);
                    debug!(error = %e, delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnect failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = cancel.cancelled() => return false,
                    }
                    self.reconnect_delay = (self.reconnect_delay * 2)
                        .min(Duration::from_millis(self.config.reconnect_max_ms));
                }
            }
        }
    }

    /// Enforce the rate ceiling: at most one attempted send per
    /// `rate_limit_ms`, measured from the previous attempt's start.
    async fn throttle(&mut self) {
        if let Some(last) = self.last_attempt_at {
            let since = last.elapsed();
            let limit = self.config.rate_limit();
            if since < limit {
                let pause = limit - since;
                debug!(sleep_ms = pause.as_millis() as u64, "Rate limiting");
                tokio::time::sleep(pause).await;
            }
        }
        self.last_attempt_at = Some(Instant::now());
    }

    /// Run the attempt sequence for one frame: drain, single write, ACK wait,
    /// bounded retries. Never returns an error; failures are data.
    async fn drive_frame(&mut self, frame: &Frame, enqueued_at: Instant) -> Outcome {
        let attempts = self.config.retries + 1;
        let mut failed_attempts = 0u32;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            // A peer close on the previous attempt dropped the socket; each
            // attempt re-establishes it so one reset costs one attempt, not
            // the whole item.
            if let Err(e) = self.transport.ensure_connected().await {
                self.shared.connected.store(false, Ordering::Relaxed);
                last_error = e.to_string();
                failed_attempts += 1;
                warn!(frame = %frame, attempt, error = %last_error, "Connect failed before send");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_pause_ms)).await;
                }
                continue;
            }
            self.shared.connected.store(true, Ordering::Relaxed);

            // Stale ACKs from a previous item that timed out must not decide
            // this frame's fate.
            let drained = self.transport.drain();
            if drained > 0 {
                debug!(frame = %frame, drained, "Discarded residual bytes before send");
            }

            if let Err(e) = self.transport.write_frame(frame).await {
                last_error = e.to_string();
                failed_attempts += 1;
                error!(frame = %frame, attempt, error = %last_error, "Send failed");
                self.shared.connected.store(false, Ordering::Relaxed);
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_pause_ms)).await;
                }
                continue;
            }
            info!(frame = %frame, attempt, bytes = frame.as_bytes().len(), "Frame sent");

            if !self.config.require_ack {
                return Outcome {
                    ok: true,
                    retries: failed_attempts,
                    elapsed_ms: enqueued_at.elapsed().as_millis() as u64,
                    error: None,
                };
            }

            match self.await_ack(frame).await {
                Ok(wait_ms) => {
                    info!(frame = %frame, wait_ms, "ACK received");
                    return Outcome {
                        ok: true,
                        retries: failed_attempts,
                        elapsed_ms: enqueued_at.elapsed().as_millis() as u64,
                        error: None,
                    };
                }
                Err(e) => {
                    last_error = e;
                    failed_attempts += 1;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_pause_ms)).await;
                    }
                }
            }
        }

        Outcome::failure(
            failed_attempts,
            enqueued_at.elapsed().as_millis() as u64,
            last_error,
        )
    }

    /// Read until `K`, discarding junk bytes, within the ACK deadline.
    /// Returns the wait in milliseconds on success.
    async fn await_ack(&mut self, frame: &Frame) -> Result<u64, String> {
        let deadline = self.config.ack_timeout();
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            let Some(remaining) = deadline.checked_sub(elapsed) else {
                warn!(frame = %frame, timeout_ms = deadline.as_millis() as u64, "ACK timeout");
                return Err("ACK timeout".to_string());
            };

            match self.transport.read_byte(remaining).await {
                Ok(ACK_BYTE) => return Ok(started.elapsed().as_millis() as u64),
                Ok(junk) => {
                    debug!(frame = %frame, byte = junk, "Ignoring junk byte while waiting for ACK");
                }
                Err(TransportError::Timeout) => {
                    warn!(frame = %frame, timeout_ms = deadline.as_millis() as u64, "ACK timeout");
                    return Err("ACK timeout".to_string());
                }
                Err(TransportError::PeerClosed) => {
                    warn!(frame = %frame, "Peer closed while waiting for ACK");
                    self.shared.connected.store(false, Ordering::Relaxed);
                    return Err("peer closed".to_string());
                }
                Err(e) => {
                    warn!(frame = %frame, error = %e, "ACK read error");
                    self.shared.connected.store(false, Ordering::Relaxed);
                    return Err(e.to_string());
                }
            }
        }
    }

    /// Device health and link status bookkeeping after each item.
    fn record_result(&self, frame: &Frame, outcome: &Outcome) {
        let mut health = match self.shared.health.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        health.record(frame.device_letter(), &frame.to_string(), outcome.ok);

        if outcome.ok {
            health.set_connection_status(ConnectionStatus::Connected);
            health.touch_heartbeat();
        } else if self.config.require_ack {
            health.set_connection_status(ConnectionStatus::Disconnected);
        }
        // In fire-and-forget mode a failed send does not prove the link is
        // down, so the status is left as is.
    }
}
