use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::aggregates::{Aggregates, PendingAggregation};
use crate::clock::{align_up, Clock};
use crate::config::AggregatorConfig;
use crate::error::AggregatorError;
use crate::executor::Executor;
use crate::repository::TransactionPointRepository;
use crate::trace::Trace;

enum Message {
    Trace(PendingAggregation),
    Shutdown,
}

/// Buckets completed traces into wall-clock-aligned windows and flushes
/// them asynchronously to a [`TransactionPointRepository`].
///
/// One of these per process: construct it once, hand it every completed
/// [`Trace`] via [`add`](Self::add), and `close` it on shutdown.
pub struct TransactionAggregator {
    sender: Sender<Message>,
    /// Guards the read-clock-then-enqueue critical section in
    /// [`add`](Self::add), shared with the consumer thread's
    /// `maybe_close_window`. This is what makes the FIFO-by-captureTime
    /// guarantee hold: no producer can enqueue a trace whose
    /// `captureTime` predates a window the consumer just closed, since
    /// both sides are serialized on this mutex.
    producer_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    closed: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionAggregator {
    pub fn new(
        config: AggregatorConfig,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn Executor>,
        repository: Arc<dyn TransactionPointRepository>,
    ) -> Self {
        let (sender, receiver) = unbounded::<Message>();
        let producer_lock = Arc::new(Mutex::new(()));
        let closed = Arc::new(AtomicBool::new(false));

        let consumer = {
            let producer_lock = producer_lock.clone();
            let clock = clock.clone();
            std::thread::Builder::new()
                .name(config.consumer_thread_name.clone())
                .spawn(move || {
                    run_consumer(
                        receiver,
                        producer_lock,
                        clock,
                        executor,
                        repository,
                        config.interval,
                        config.queue_poll_grace,
                    )
                })
                .expect("failed to spawn aggregator consumer thread")
        };

        Self {
            sender,
            producer_lock,
            clock,
            closed,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Enqueues a completed trace, stamping it with the wall-clock
    /// `captureTime` it is now due to land in.
    pub fn add(&self, trace: Trace, trace_will_be_stored: bool) -> Result<i64, AggregatorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AggregatorError::Closed);
        }

        let _guard = self.producer_lock.lock().unwrap();
        let capture_time = self.clock.now_millis();
        let pending = PendingAggregation {
            capture_time,
            trace,
            trace_will_be_stored,
        };

        self.sender
            .send(Message::Trace(pending))
            .map_err(|_| AggregatorError::Closed)?;
        Ok(capture_time)
    }

    /// Interrupts the consumer thread and waits for it to exit. Traces
    /// added before this call are not guaranteed to be flushed; in
    /// practice the consumer flushes whatever window it is holding
    /// before it exits.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.sender.send(Message::Shutdown);

        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TransactionAggregator {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_consumer(
    receiver: Receiver<Message>,
    producer_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
    repository: Arc<dyn TransactionPointRepository>,
    interval: Duration,
    queue_poll_grace: Duration,
) {
    let interval_ms = interval.as_millis().max(1) as i64;
    let mut current_window = Aggregates::new(align_up(clock.now_millis(), interval_ms));

    loop {
        let wait_ms = (current_window.capture_time() - clock.now_millis()).max(0);
        let deadline =
            Instant::now() + Duration::from_millis(wait_ms as u64) + queue_poll_grace;

        match receiver.recv_deadline(deadline) {
            Ok(Message::Trace(pending)) => {
                if pending.capture_time > current_window.capture_time() {
                    let finished = std::mem::replace(
                        &mut current_window,
                        Aggregates::new(align_up(pending.capture_time, interval_ms)),
                    );
                    dispatch_flush(finished, &executor, &repository);
                }

                // A panic while folding one trace (e.g. a host-supplied
                // `Ticker` that panics) must not take the whole consumer
                // thread down with it: log it and move on to the next
                // message. Genuinely fatal errors (allocator OOM) abort
                // the process before `catch_unwind` ever gets a chance,
                // which is the one case this can't paper over.
                let ticker = pending.trace.ticker().clone();
                let capture_time = current_window.capture_time();
                let window = &current_window;
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    window.add(&pending.trace, ticker.as_ref(), pending.trace_will_be_stored);
                }));
                if let Err(payload) = outcome {
                    log::error!(
                        "dropped a trace while folding into window capture_time={capture_time}: {}",
                        panic_message(&payload)
                    );
                }
            }
            Ok(Message::Shutdown) => {
                // `close()` models a thread interrupt: it wakes the
                // blocked `recv_deadline` immediately instead of waiting
                // out the grace period, then terminates cleanly.
                log::debug!("aggregator consumer received shutdown, flushing final window");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                maybe_close_window(
                    &producer_lock,
                    &mut current_window,
                    clock.as_ref(),
                    interval_ms,
                    &executor,
                    &repository,
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("aggregator producer side disconnected, terminating consumer");
                break;
            }
        }
    }

    dispatch_flush(current_window, &executor, &repository);
}

/// Renders a `catch_unwind` payload as a string for logging, the same
/// downcast dance `std::panic::catch_unwind`'s own documentation
/// recommends.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn maybe_close_window(
    producer_lock: &Mutex<()>,
    current_window: &mut Aggregates,
    clock: &dyn Clock,
    interval_ms: i64,
    executor: &Arc<dyn Executor>,
    repository: &Arc<dyn TransactionPointRepository>,
) {
    let _guard = producer_lock.lock().unwrap();
    let now = clock.now_millis();
    if now > current_window.capture_time() {
        let finished = std::mem::replace(current_window, Aggregates::new(align_up(now, interval_ms)));
        dispatch_flush(finished, executor, repository);
    }
}

fn dispatch_flush(
    window: Aggregates,
    executor: &Arc<dyn Executor>,
    repository: &Arc<dyn TransactionPointRepository>,
) {
    let capture_time = window.capture_time();
    let repository = repository.clone();
    executor.submit(Box::new(move || {
        if !window.seal() {
            return;
        }
        for (type_key, (overall, per_transaction)) in window.build_points() {
            // A failed `store` call abandons the rest of this window
            // rather than retrying; the consumer has already moved on to
            // the next one.
            if let Err(err) = repository.store(&type_key, overall, per_transaction) {
                log::warn!(
                    "dropping window capture_time={capture_time} type={type_key:?}: {err}"
                );
                return;
            }
        }
    }));
}
