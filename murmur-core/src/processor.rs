//! Streaming inference bridge
//!
//! [`SpeechProcessor`] drives one long-running engine pass at a time on a
//! dedicated blocking worker and re-exposes the segments the engine reports
//! through callbacks as an ordered, cancellable [`SegmentStream`].
//!
//! The handoff between the worker and the consumer is an unbounded FIFO
//! queue paired with a [`ResetSignal`]: the callback frame enqueues and
//! signals without ever blocking, the stream drains, parks on the signal,
//! and performs a final drain once the worker finishes. A strictly
//! increasing segment cursor guarantees in-order, duplicate-free delivery
//! across callback bursts.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::{EngineError, PassCallbacks, SegmentSource, SpeechEngine};
use crate::error::{MurmurError, Result};
use crate::params::DecodeParams;
use crate::registry;
use crate::segment::Segment;
use crate::signal::ResetSignal;
use crate::wave::WaveReader;

type ProgressFn = Arc<dyn Fn(i32) + Send + Sync>;

/// State of one inference pass, shared between the callback frame (worker
/// thread) and the consuming stream (async task).
struct PassState {
    queue: Mutex<VecDeque<Segment>>,
    signal: ResetSignal,
    cancel: CancellationToken,
    /// Index of the next engine segment to extract. Only the worker thread
    /// advances it, inside the new-segment handler.
    cursor: AtomicI32,
    diarize: bool,
    probabilities: bool,
    progress: Option<ProgressFn>,
}

impl PassState {
    fn new(
        cancel: CancellationToken,
        diarize: bool,
        probabilities: bool,
        progress: Option<ProgressFn>,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            signal: ResetSignal::new(),
            cancel,
            cursor: AtomicI32::new(0),
            diarize,
            probabilities,
            progress,
        }
    }

    fn pop(&self) -> Option<Segment> {
        self.queue.lock().pop_front()
    }

    fn handle_encoder_begin(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn handle_progress(&self, progress: i32) {
        if let Some(report) = &self.progress {
            report(progress);
        }
    }

    fn handle_abort(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Extract every segment the engine committed since the last call,
    /// starting at the cursor. Blank segments are skipped but still advance
    /// the cursor; a cancellation observed right after an enqueue leaves the
    /// cursor untouched and returns immediately.
    fn handle_new_segment(&self, source: &dyn SegmentSource, _n_new: i32) {
        if self.cancel.is_cancelled() {
            return;
        }

        let total = source.segment_count();
        let language = source.language();

        let mut cursor = self.cursor.load(Ordering::Acquire);
        while cursor < total {
            let start = Duration::from_millis(source.segment_start_cs(cursor).max(0) as u64 * 10);
            let end = Duration::from_millis(source.segment_end_cs(cursor).max(0) as u64 * 10);
            let text = source.segment_text(cursor);
            let text = text.trim();

            let token_count = source.token_count(cursor);
            let mut min_probability = 0.0f32;
            let mut max_probability = 0.0f32;
            let mut sum_probability = 0.0f64;

            if self.probabilities {
                for token in 0..token_count {
                    let p = source.token_probability(cursor, token);
                    sum_probability += p as f64;
                    if token == 0 {
                        min_probability = p;
                        max_probability = p;
                        continue;
                    }
                    if p < min_probability {
                        min_probability = p;
                    }
                    if p > max_probability {
                        max_probability = p;
                    }
                }
            }

            let speaker_turn = self.diarize && source.speaker_turn_next(cursor);

            if !text.is_empty() {
                let probability = if self.probabilities && token_count > 0 {
                    (sum_probability / token_count as f64) as f32
                } else {
                    0.0
                };

                self.queue.lock().push_back(Segment {
                    text: text.to_string(),
                    start,
                    end,
                    min_probability,
                    max_probability,
                    probability,
                    language: language.clone(),
                    speaker_turn,
                });
                self.signal.set();

                if self.cancel.is_cancelled() {
                    return;
                }
            }

            cursor += 1;
            self.cursor.store(cursor, Ordering::Release);
        }
    }
}

/// Per-processor state reachable from callback frames via the session
/// registry.
pub(crate) struct ProcessorShared {
    session: i64,
    closed: AtomicBool,
    /// Set when the owner was dropped mid-pass; the worker unregisters the
    /// session once the pass finishes.
    defunct: AtomicBool,
    current: Mutex<Option<Arc<PassState>>>,
}

impl ProcessorShared {
    /// The pass a callback belongs to. Hooks only fire while a pass is
    /// installed, so an empty slot is the same consistency fault as a
    /// registry miss.
    fn pass(&self) -> Arc<PassState> {
        match self.current.lock().clone() {
            Some(pass) => pass,
            None => panic!(
                "callback fired for session {} with no pass in flight",
                self.session
            ),
        }
    }
}

fn on_encoder_begin(session: i64) -> bool {
    registry::lookup(session).pass().handle_encoder_begin()
}

fn on_progress(session: i64, progress: i32) {
    registry::lookup(session).pass().handle_progress(progress);
}

fn on_new_segment(session: i64, source: &dyn SegmentSource, n_new: i32) {
    registry::lookup(session).pass().handle_new_segment(source, n_new);
}

fn on_abort(session: i64) -> bool {
    registry::lookup(session).pass().handle_abort()
}

/// Releases the gate and clears the pass slot when a worker finishes, on
/// every exit path including panics.
struct PassCleanup {
    shared: Arc<ProcessorShared>,
    permit: OwnedSemaphorePermit,
}

impl Drop for PassCleanup {
    fn drop(&mut self) {
        if let Some(pass) = self.shared.current.lock().take() {
            // Wake a parked consumer; it observes completion via the handle.
            pass.signal.set();
        }
        if self.shared.defunct.load(Ordering::Acquire) {
            registry::unregister(self.shared.session);
        }
        // The permit drops last, reopening the gate.
        let _ = &self.permit;
    }
}

/// Runs inference passes against a [`SpeechEngine`], one at a time, and
/// streams the resulting segments.
///
/// Close the processor with [`close`](SpeechProcessor::close) (fails while a
/// pass runs) or [`shutdown`](SpeechProcessor::shutdown) (waits for the pass
/// to finish). Dropping without closing is handled best-effort.
pub struct SpeechProcessor {
    engine: Arc<dyn SpeechEngine>,
    params: DecodeParams,
    session: i64,
    shared: Arc<ProcessorShared>,
    gate: Arc<Semaphore>,
    probabilities: bool,
    progress: Option<ProgressFn>,
}

impl SpeechProcessor {
    pub fn new(engine: Arc<dyn SpeechEngine>, params: DecodeParams) -> Self {
        let session = registry::mint_session();
        let shared = Arc::new(ProcessorShared {
            session,
            closed: AtomicBool::new(false),
            defunct: AtomicBool::new(false),
            current: Mutex::new(None),
        });
        registry::register(session, shared.clone());
        debug!("processor registered for session {}", session);

        Self {
            engine,
            params,
            session,
            shared,
            gate: Arc::new(Semaphore::new(1)),
            probabilities: false,
            progress: None,
        }
    }

    /// Enable per-segment token probability tracking.
    pub fn with_probabilities(mut self, enabled: bool) -> Self {
        self.probabilities = enabled;
        self
    }

    /// Install a progress sink receiving values in 0..=100.
    pub fn with_progress(mut self, report: impl Fn(i32) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(report));
        self
    }

    /// The process-unique id callbacks use to route back to this processor.
    pub fn session_id(&self) -> i64 {
        self.session
    }

    /// Run one inference pass over `samples` (16 kHz mono, normalized) and
    /// stream the segments as the engine reports them.
    ///
    /// Waits until any previous pass on this processor has finished; a
    /// closed processor is refused.
    pub async fn process(
        &self,
        samples: Vec<f32>,
        cancel: CancellationToken,
    ) -> Result<SegmentStream> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(MurmurError::Closed);
        }

        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MurmurError::Closed)?;

        // The processor may have been closed while this call waited.
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(MurmurError::Closed);
        }

        let pass = Arc::new(PassState::new(
            cancel,
            self.params.diarize,
            self.probabilities,
            self.progress.clone(),
        ));
        *self.shared.current.lock() = Some(pass.clone());

        let callbacks = PassCallbacks {
            session: self.session,
            on_encoder_begin,
            on_progress,
            on_new_segment,
            on_abort,
        };

        debug!(
            "starting inference pass for session {} over {} samples",
            self.session,
            samples.len()
        );

        let engine = self.engine.clone();
        let params = self.params.clone();
        let shared = self.shared.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let _cleanup = PassCleanup { shared, permit };
            engine
                .run_pass(&samples, &params, callbacks)
                .map_err(MurmurError::from)
        });

        Ok(SegmentStream {
            pass,
            worker: Some(worker),
            outcome: None,
            done: false,
        })
    }

    /// Parse a WAVE container, downmix it to mono and run a pass over it.
    pub async fn process_wave<R>(&self, stream: R, cancel: CancellationToken) -> Result<SegmentStream>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let mut reader = WaveReader::new(stream);
        let samples = reader.mono_samples_async(&cancel).await?;
        self.process(samples, cancel).await
    }

    /// Close the processor immediately. Fails with
    /// [`MurmurError::PassInFlight`] while a pass is running; use
    /// [`shutdown`](SpeechProcessor::shutdown) to wait instead.
    pub fn close(&self) -> Result<()> {
        match self.gate.try_acquire() {
            Ok(permit) => {
                self.shared.closed.store(true, Ordering::Release);
                registry::unregister(self.session);
                drop(permit);
                debug!("processor closed for session {}", self.session);
                Ok(())
            }
            Err(_) => Err(MurmurError::PassInFlight),
        }
    }

    /// Wait for any running pass to finish, then close the processor.
    pub async fn shutdown(&self) -> Result<()> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MurmurError::Closed)?;
        self.shared.closed.store(true, Ordering::Release);
        registry::unregister(self.session);
        drop(permit);
        debug!("processor shut down for session {}", self.session);
        Ok(())
    }
}

impl Drop for SpeechProcessor {
    fn drop(&mut self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        match self.gate.try_acquire() {
            Ok(_permit) => {
                self.shared.closed.store(true, Ordering::Release);
                registry::unregister(self.session);
            }
            Err(_) => {
                self.shared.defunct.store(true, Ordering::Release);
                self.shared.closed.store(true, Ordering::Release);
                // The pass may have finished between the two flags; make
                // sure the session does not outlive both owners.
                if self.gate.try_acquire().is_ok() {
                    registry::unregister(self.session);
                }
                error!(
                    "processor for session {} dropped while a pass was in flight",
                    self.session
                );
            }
        }
    }
}

/// Ordered stream of segments produced by one inference pass.
///
/// Ends after the worker has finished and every enqueued segment has been
/// drained; a worker failure surfaces as the last item, after the drain.
/// Cancellation ends the stream with [`MurmurError::Cancelled`].
pub struct SegmentStream {
    pass: Arc<PassState>,
    worker: Option<JoinHandle<Result<()>>>,
    outcome: Option<Result<()>>,
    done: bool,
}

impl std::fmt::Debug for SegmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStream")
            .field("worker", &self.worker)
            .field("outcome", &self.outcome)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Stream for SegmentStream {
    type Item = Result<Segment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.pass.cancel.is_cancelled() {
            this.done = true;
            return Poll::Ready(Some(Err(MurmurError::Cancelled)));
        }

        loop {
            if let Some(segment) = this.pass.pop() {
                return Poll::Ready(Some(Ok(segment)));
            }

            match this.worker.as_mut() {
                Some(handle) => match Pin::new(handle).poll(cx) {
                    Poll::Ready(join) => {
                        this.worker = None;
                        this.outcome = Some(flatten_join(join));
                        // Loop once more for the final drain.
                    }
                    Poll::Pending => match this.pass.signal.poll_wait(cx) {
                        Poll::Ready(()) => continue,
                        Poll::Pending => return Poll::Pending,
                    },
                },
                None => {
                    this.done = true;
                    return match this.outcome.take() {
                        Some(Err(err)) => Poll::Ready(Some(Err(err))),
                        _ => Poll::Ready(None),
                    };
                }
            }
        }
    }
}

fn flatten_join(join: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match join {
        Ok(result) => result,
        Err(err) => Err(MurmurError::Engine(EngineError::Fault(format!(
            "inference worker did not finish cleanly: {}",
            err
        )))),
    }
}
