//! Buffered persistence writer.
//!
//! Accepted events land in a bounded in-memory buffer owned by one worker
//! task; the buffer is flushed on a fixed interval or immediately at
//! capacity. A failed flush puts the whole batch back at the head and
//! raises a dismissible save-error flag; nothing is silently discarded.
//! Appending never waits on the store.

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::models::{ActivityEvent, ActivityEventType};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

/// Batch-insert seam over the durable store. `Database` implements this;
/// tests substitute a sink that fails on demand.
pub trait EventSink: Send + 'static {
    fn insert_batch(
        &self,
        events: Vec<ActivityEvent>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// User-visible "failed to save" banner state. Raised after the first
/// failed flush, cleared by the next successful one or an explicit
/// dismissal.
#[derive(Clone, Default)]
pub struct SaveErrorFlag {
    raised: Arc<AtomicBool>,
}

impl SaveErrorFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn dismiss(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}

/// The buffer plus flush logic, separate from the worker loop so tests can
/// drive it directly.
pub struct WriterState<S: EventSink> {
    sink: S,
    buffer: Vec<ActivityEvent>,
    capacity: usize,
    error_flag: SaveErrorFlag,
}

impl<S: EventSink> WriterState<S> {
    pub fn new(sink: S, capacity: usize, error_flag: SaveErrorFlag) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity,
            error_flag,
        }
    }

    /// Returns true when the buffer hit capacity and wants an immediate
    /// flush.
    pub fn append(&mut self, event: ActivityEvent) -> bool {
        self.buffer.push(event);
        self.buffer.len() >= self.capacity
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.buffer);
        match self.sink.insert_batch(batch.clone()).await {
            Ok(()) => {
                self.error_flag.clear();
                Ok(())
            }
            Err(err) => {
                // Requeue at the head so ordering survives the retry.
                let mut restored = batch;
                restored.append(&mut self.buffer);
                self.buffer = restored;
                self.error_flag.raise();
                Err(err)
            }
        }
    }
}

enum WriterCommand {
    Append(ActivityEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the writer worker. Cloneable; appends are fire-and-forget.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterCommand>,
    error_flag: SaveErrorFlag,
}

impl WriterHandle {
    pub fn append(&self, event: ActivityEvent) {
        if self.tx.send(WriterCommand::Append(event)).is_err() {
            log_warn!("writer worker gone; event dropped");
        }
    }

    pub fn save_error(&self) -> &SaveErrorFlag {
        &self.error_flag
    }

    /// One final best-effort flush. Failure is tolerated; everything up to
    /// the last completed flush is already durable.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

/// Spawn the writer worker: one task owning the buffer, serializing the
/// append and flush paths so a batch can never interleave.
pub fn spawn_writer<S: EventSink>(
    sink: S,
    config: &MonitorConfig,
    cancel_token: CancellationToken,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let error_flag = SaveErrorFlag::new();
    let state = WriterState::new(sink, config.buffer_capacity, error_flag.clone());

    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);

    let task = tokio::spawn(writer_loop(
        state,
        rx,
        flush_interval,
        heartbeat_interval,
        cancel_token,
    ));

    (WriterHandle { tx, error_flag }, task)
}

async fn writer_loop<S: EventSink>(
    mut state: WriterState<S>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    flush_interval: Duration,
    heartbeat_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut flush_tick = time::interval_at(Instant::now() + flush_interval, flush_interval);
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat_tick =
        time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(WriterCommand::Append(event)) => {
                    if state.append(event) {
                        if let Err(err) = state.flush().await {
                            log_error!("capacity flush failed, batch requeued: {err:#}");
                        }
                    }
                }
                Some(WriterCommand::Shutdown(reply)) => {
                    if let Err(err) = state.flush().await {
                        log_warn!("final flush failed ({} events unsaved): {err:#}", state.pending());
                    }
                    let _ = reply.send(());
                    break;
                }
                None => {
                    let _ = state.flush().await;
                    break;
                }
            },
            _ = flush_tick.tick() => {
                if state.pending() > 0 {
                    if let Err(err) = state.flush().await {
                        log_error!("interval flush failed, batch requeued: {err:#}");
                    }
                }
            }
            _ = heartbeat_tick.tick() => {
                // Durability checkpoint so long idle periods still leave a trace.
                let heartbeat = ActivityEvent::new(ActivityEventType::Heartbeat, Utc::now());
                if state.append(heartbeat) {
                    let _ = state.flush().await;
                }
            }
            _ = cancel_token.cancelled() => {
                // Appends already queued must not lose the race against
                // cancellation.
                while let Ok(command) = rx.try_recv() {
                    match command {
                        WriterCommand::Append(event) => {
                            state.append(event);
                        }
                        WriterCommand::Shutdown(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
                if let Err(err) = state.flush().await {
                    log_warn!("final flush failed ({} events unsaved): {err:#}", state.pending());
                }
                break;
            }
        }
    }

    log_info!("writer worker shutting down");
}
