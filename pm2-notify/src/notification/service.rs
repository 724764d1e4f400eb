//! Batch notifier.
//!
//! The BatchNotifier is responsible for:
//! - Listening to the process manager's event bus
//! - Filtering, enriching and queueing relevant events
//! - Flushing the queue on a fixed interval into one merged message
//! - Keeping at most one delivery in flight

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pm2_bus::{BusMessage, BusReader, ProcessInfo, RawEvent};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::channels::NotificationChannel;
use super::enricher::EventEnricher;
use super::events::OutboundMessage;
use super::filter::EventFilter;
use super::gate::{DeliveryGate, GatePermit};
use super::merger::BatchMerger;
use super::queue::BatchQueue;
use crate::Result;

/// Runtime settings of the notifier.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// Time between two flush attempts.
    pub polling_interval: Duration,
    /// Run one last flush when stopping.
    pub flush_on_shutdown: bool,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10),
            flush_on_shutdown: true,
        }
    }
}

/// Result of a single flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued; the gate was not touched.
    Empty,
    /// A delivery is in flight; queued events wait for the next flush.
    Busy,
    /// A merged message carrying `events` events was handed to the channel.
    Dispatched { events: usize },
    /// The batch could not be merged and was dropped.
    Failed,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    enrichment_failures: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    events_delivered: AtomicU64,
    dropped_events: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Statistics about the notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    /// Events waiting for the next flush.
    pub queued: usize,
    /// Whether a delivery is currently running.
    pub in_flight: bool,
    /// Events that passed the filter and were queued.
    pub accepted: u64,
    /// Events rejected by the filter.
    pub rejected: u64,
    /// Accepted events that could not be enriched.
    pub enrichment_failures: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    /// Events lost to failed merges or deliveries.
    pub dropped_events: u64,
}

/// Event-to-notification batching pipeline.
pub struct BatchNotifier {
    filter: EventFilter,
    enricher: EventEnricher,
    merger: BatchMerger,
    channel: Arc<dyn NotificationChannel>,
    settings: NotifierSettings,
    queue: BatchQueue,
    gate: Arc<DeliveryGate>,
    counters: Arc<Counters>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl BatchNotifier {
    pub fn new(
        filter: EventFilter,
        enricher: EventEnricher,
        merger: BatchMerger,
        channel: Arc<dyn NotificationChannel>,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            filter,
            enricher,
            merger,
            channel,
            settings,
            queue: BatchQueue::new(),
            gate: Arc::new(DeliveryGate::new()),
            counters: Arc::new(Counters::default()),
            in_flight: Mutex::new(None),
            scheduler: Mutex::new(None),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn channel_type(&self) -> &'static str {
        self.channel.channel_type()
    }

    /// Filter, enrich and queue one bus event.
    ///
    /// Returns whether the event was queued. Enrichment failures are logged
    /// and the event is dropped.
    pub fn handle_event(&self, event: RawEvent) -> bool {
        if !self.filter.accept(&event) {
            trace!(
                process = %event.process.name,
                kind = %event.kind,
                manually = event.manually,
                "Event filtered out"
            );
            Counters::bump(&self.counters.rejected, 1);
            return false;
        }

        let process = event.process.name.clone();
        let kind = event.kind.clone();
        match self.enricher.enrich(event) {
            Ok(enriched) => {
                self.queue.append(enriched);
                Counters::bump(&self.counters.accepted, 1);
                debug!(process = %process, kind = %kind, queued = self.queue.len(), "Event queued");
                true
            }
            Err(e) => {
                Counters::bump(&self.counters.enrichment_failures, 1);
                warn!(process = %process, kind = %kind, error = %e, "Failed to enrich event, dropped");
                false
            }
        }
    }

    /// Attempt a flush. Never waits for the delivery itself.
    pub fn try_flush(&self) -> FlushOutcome {
        if self.queue.is_empty() {
            return FlushOutcome::Empty;
        }

        let Some(permit) = self.gate.try_acquire() else {
            debug!(
                queued = self.queue.len(),
                "Delivery in flight, flush skipped"
            );
            return FlushOutcome::Busy;
        };

        let batch = self.queue.snapshot_and_clear();
        let events = batch.len();
        if events == 0 {
            // Drained by a concurrent flush between the check and the acquire.
            permit.release();
            return FlushOutcome::Empty;
        }

        let message = match self.merger.merge(&batch) {
            Ok(message) => message,
            Err(e) => {
                Counters::bump(&self.counters.batches_failed, 1);
                Counters::bump(&self.counters.dropped_events, events as u64);
                warn!(events, error = %e, "Failed to build notification, {} event(s) dropped", events);
                permit.release();
                return FlushOutcome::Failed;
            }
        };

        self.dispatch(permit, message, events);
        FlushOutcome::Dispatched { events }
    }

    fn dispatch(&self, permit: GatePermit, message: OutboundMessage, events: usize) {
        let channel = Arc::clone(&self.channel);
        let counters = Arc::clone(&self.counters);

        // Held across the spawn so a later delivery cannot be overwritten by
        // this one's handle.
        let mut in_flight = self.in_flight.lock();
        *in_flight = Some(tokio::spawn(async move {
            match channel.send(&message).await {
                Ok(()) => {
                    Counters::bump(&counters.batches_delivered, 1);
                    Counters::bump(&counters.events_delivered, events as u64);
                    info!(
                        events,
                        channel = channel.channel_type(),
                        "Notification sent: {}",
                        message.subject
                    );
                }
                Err(e) => {
                    Counters::bump(&counters.batches_failed, 1);
                    Counters::bump(&counters.dropped_events, events as u64);
                    warn!(
                        events,
                        channel = channel.channel_type(),
                        error = %e,
                        "Delivery failed, {} event(s) dropped",
                        events
                    );
                }
            }
            permit.release();
        }));
    }

    /// Wait for the in-flight delivery, if any, to complete.
    pub async fn wait_idle(&self) {
        let handle = self.in_flight.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Delivery task panicked");
        }
    }

    /// Start the periodic flush task. It runs until [`stop`](Self::stop).
    pub fn start_flush_task(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            warn!("Flush scheduler already running");
            return;
        }

        let notifier = Arc::clone(self);
        let cancellation_token = self.cancellation_token.clone();

        *scheduler = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(notifier.settings.polling_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Flush scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let outcome = notifier.try_flush();
                        trace!(?outcome, "Scheduled flush");
                    }
                }
            }
        }));
    }

    /// Consume bus messages until the feed ends or the notifier stops.
    ///
    /// The end of the feed does not stop the flush scheduler: events already
    /// queued are still delivered.
    pub fn listen_for_bus_events<R>(self: &Arc<Self>, mut reader: BusReader<R>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let notifier = Arc::clone(self);
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Bus event listener shutting down");
                        break;
                    }
                    message = reader.next_message() => {
                        match message {
                            Some(Ok(BusMessage::ProcessEvent(event))) => {
                                notifier.handle_event(event);
                            }
                            Some(Ok(BusMessage::Kill { message })) => {
                                error!(
                                    reason = message.as_deref().unwrap_or("unknown"),
                                    "Process manager is being killed"
                                );
                            }
                            Some(Ok(BusMessage::Other { topic })) => {
                                trace!(topic = %topic, "Ignoring bus packet");
                            }
                            Some(Err(e)) if e.is_recoverable() => {
                                warn!(error = %e, "Skipping malformed bus packet");
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Event subscription failed");
                                break;
                            }
                            None => {
                                warn!("Event feed ended, no further events will be received");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Send one synthetic notification through the full pipeline.
    pub async fn send_test(&self) -> Result<()> {
        let mut process = ProcessInfo::named("pm2-notify");
        process.pm_id = Some(0);
        process.pid = Some(u64::from(std::process::id()));
        let event = RawEvent::new("test", chrono::Utc::now().timestamp_millis(), process);

        let enriched = self.enricher.enrich(event)?;
        let message = self.merger.merge(std::slice::from_ref(&enriched))?;
        self.channel.test(&message).await?;

        info!(channel = self.channel.channel_type(), "Test notification sent: {}", message.subject);
        Ok(())
    }

    /// Get notifier statistics.
    pub fn stats(&self) -> NotificationStats {
        let c = &self.counters;
        NotificationStats {
            queued: self.queue.len(),
            in_flight: self.gate.is_busy(),
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            enrichment_failures: c.enrichment_failures.load(Ordering::Relaxed),
            batches_delivered: c.batches_delivered.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            events_delivered: c.events_delivered.load(Ordering::Relaxed),
            dropped_events: c.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Stop the listener and scheduler.
    ///
    /// Waits for the scheduler to exit and for the running delivery to
    /// finish. With `flush_on_shutdown`, then delivers whatever is still
    /// queued.
    pub async fn stop(&self) {
        info!("Stopping batch notifier");
        self.cancellation_token.cancel();

        // A tick already inside `try_flush` may still dispatch; once the
        // task has exited, `in_flight` holds every delivery it started.
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler
            && let Err(e) = scheduler.await
        {
            error!(error = %e, "Flush scheduler panicked");
        }
        self.wait_idle().await;

        if self.settings.flush_on_shutdown {
            let outcome = self.try_flush();
            debug!(?outcome, "Final flush");
            self.wait_idle().await;
        } else if !self.queue.is_empty() {
            warn!(events = self.queue.len(), "Discarding queued events on shutdown");
        }

        info!("Batch notifier stopped");
    }
}
