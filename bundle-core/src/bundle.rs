//! Bundle lifecycle management for an operator. The [`BundleManager`] also acts as a proxy for the
//! operator's watermark processing and decides to
//! 1. hold the watermark if there is at least one bundle in progress, or
//! 2. propagate the watermark downstream if all previous bundles have completed.
//!
//! A bundle is complete only once the outputs of every element in it have resolved. For a
//! synchronous processor that is as soon as processing the element returns, for an asynchronous
//! processor it is once every output future it produced has resolved.
//!
//! Two lifecycles overlap here. A bundle is *in progress* while it accumulates elements, and it is
//! *pending* from its start until its outputs have resolved. A new bundle can start accumulating
//! while previous bundles are still pending.
//!
//! ```text
//!   try_start_bundle      try_finish_bundle (size/time reached)      outputs resolved
//! ------|======================|-----------------------------------------|------------
//!       |<---- in progress --->|                                         |
//!       |<----------------------------- pending ------------------------>|
//!                                                   on_bundle_finished, held watermark released
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::collector::FutureCollector;
use crate::config::BundleConfig;
use crate::emitter::OutputEmitter;
use crate::listener::BundleProgressListener;
use crate::output::{self, OutputFuture};
use crate::timer::{TimerEvent, TimerScheduler};
use crate::watermark::Watermark;
use crate::{Error, Result};

/// Added to half the max bundle time when scheduling the next bundle check.
const MIN_BUNDLE_CHECK_TIME: Duration = Duration::from_millis(10);

/// Bundle start time while no bundle is in progress.
const IDLE_BUNDLE_START: u64 = u64::MAX;

pub struct BundleManager<T> {
    max_bundle_size: u64,
    max_bundle_time: Duration,
    bundle_check_timer_id: String,
    listener: Arc<dyn BundleProgressListener<T>>,
    future_collector: Arc<dyn FutureCollector<T>>,
    timer_scheduler: Arc<dyn TimerScheduler>,
    /// Reference point of `bundle_start_time`.
    epoch: Instant,
    /// Number of elements in the bundle in progress.
    current_bundle_element_count: AtomicU64,
    /// Number of bundles started whose outputs have not resolved yet. Decremented from the bundle
    /// completion task.
    pending_bundle_count: Arc<AtomicU64>,
    /// Millis since `epoch` when the bundle in progress started, [`IDLE_BUNDLE_START`] if none.
    bundle_start_time: AtomicU64,
    /// Whether a bundle is in progress. The compare-and-set on it decides who owns the close.
    bundle_started: AtomicBool,
    /// Latest watermark seen while a bundle was in progress or pending.
    watermark_hold: Mutex<Option<Watermark>>,
    /// Output handles of the bundle in progress that were sealed without closing it.
    current_bundle_results: Mutex<Vec<OutputFuture<T>>>,
    /// Signalled every time a pending bundle completes.
    bundle_completed: Arc<Notify>,
}

impl<T> BundleManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates the manager and schedules the first bundle check. Must be driven within a tokio
    /// runtime, closing a bundle spawns the task resolving its outputs.
    pub fn new(
        config: &BundleConfig,
        listener: Arc<dyn BundleProgressListener<T>>,
        future_collector: Arc<dyn FutureCollector<T>>,
        timer_scheduler: Arc<dyn TimerScheduler>,
    ) -> Self {
        let manager = Self {
            max_bundle_size: config.max_bundle_size,
            max_bundle_time: config.max_bundle_time,
            bundle_check_timer_id: config.bundle_check_timer_id.clone(),
            listener,
            future_collector,
            timer_scheduler,
            epoch: Instant::now(),
            current_bundle_element_count: AtomicU64::new(0),
            pending_bundle_count: Arc::new(AtomicU64::new(0)),
            bundle_start_time: AtomicU64::new(IDLE_BUNDLE_START),
            bundle_started: AtomicBool::new(false),
            watermark_hold: Mutex::new(None),
            current_bundle_results: Mutex::new(Vec::new()),
            bundle_completed: Arc::new(Notify::new()),
        };

        // every element is its own bundle and is closed right away, no need to check on time
        if manager.max_bundle_size > 1 {
            manager.schedule_next_bundle_check();
        }
        manager
    }

    /// Schedules a processing-time check of whether the bundle in progress should be closed. The
    /// max bundle time is only approximated by checking every half of it, so a bundle can stay
    /// open up to 1.5 times the max bundle time. This avoids registering a timer for every bundle.
    fn schedule_next_bundle_check(&self) {
        let next_check = Instant::now() + self.max_bundle_time / 2 + MIN_BUNDLE_CHECK_TIME;
        self.timer_scheduler.schedule(&self.bundle_check_timer_id, next_check);
    }

    /// Invoked right before an element is handed to the processing function. Starts a new bundle
    /// if none is in progress and counts the element into the bundle in progress.
    pub fn try_start_bundle(&self) -> Result<()> {
        self.future_collector.prepare();

        if self
            .bundle_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // the previous bundle must have been sealed and its handles drained
            if !self.current_bundle_results.lock().is_empty() {
                return Err(Error::Bundle(
                    "current bundle futures should be empty before starting a new bundle"
                        .to_string(),
                ));
            }
            self.bundle_start_time.store(self.elapsed_millis(), Ordering::SeqCst);
            let pending = self.pending_bundle_count.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(pending, "Starting a new bundle");
            self.listener.on_bundle_started()?;
        }

        self.current_bundle_element_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Propagates the watermark right away if no bundle is in progress or pending, otherwise holds
    /// it until the bundle in progress finishes. Only the latest held watermark is kept.
    pub fn process_watermark<E>(&self, watermark: Watermark, emitter: &E) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if !self.bundle_started.load(Ordering::SeqCst)
            && self.pending_bundle_count.load(Ordering::SeqCst) == 0
        {
            // a watermark held since the last close is older than this one, releasing it
            // later would regress the downstream watermark
            if let Some(stale) = self.watermark_hold.lock().take() {
                debug!(%stale, %watermark, "Dropping held watermark superseded by a newer one");
            }
            return self.listener.on_watermark(watermark, emitter);
        }

        debug!(%watermark, "Holding watermark until the bundle finishes");
        *self.watermark_hold.lock() = Some(watermark);

        // in batch mode the end-of-stream watermark should force the bundle to close
        if watermark.is_end_of_stream() {
            self.try_finish_bundle(emitter)?;
        }
        Ok(())
    }

    /// Handles the internal bundle-check timer, any other timer is ignored.
    pub fn process_timer<E>(&self, timer: &TimerEvent, emitter: &E) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if timer.timer_id != self.bundle_check_timer_id {
            return Ok(());
        }

        self.try_finish_bundle(emitter)?;
        self.try_release_watermark_hold(emitter)?;
        self.schedule_next_bundle_check();
        Ok(())
    }

    /// Seals the outputs collected since the last element started and closes the bundle in
    /// progress if it reached its size or time limit. The (possibly pending) output handle is
    /// always handed to the emitter, in call order.
    pub fn try_finish_bundle<E>(&self, emitter: &E) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        // the outputs of every element are sealed whether or not the bundle closes now
        let mut output_future = self.future_collector.finish();
        let mut completion = None;

        if self.should_finish_bundle()
            && self
                .bundle_started
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let element_count = self
                .current_bundle_element_count
                .swap(0, Ordering::SeqCst);
            self.bundle_start_time.store(IDLE_BUNDLE_START, Ordering::SeqCst);
            let watermark_hold = self.watermark_hold.lock().take();
            let previous_results = std::mem::take(&mut *self.current_bundle_results.lock());
            debug!(element_count, ?watermark_hold, "Closing bundle");

            let combined = self.bundle_completion(
                output::flatten(previous_results),
                output_future,
                watermark_hold,
                emitter.clone(),
            );
            completion = Some(combined.clone());
            output_future = combined;
        } else if self.bundle_started.load(Ordering::SeqCst) {
            self.current_bundle_results.lock().push(output_future.clone());
        }

        let emitted = emitter.emit_future(output_future);

        // drive the completion only after its handle is queued downstream, so whatever the
        // listener emits follows the outputs of the bundle
        if let Some(completion) = completion {
            tokio::spawn(async move {
                if let Err(e) = completion.await {
                    error!(?e, "Failed to resolve the outputs of a bundle");
                }
            });
        }
        emitted
    }

    /// Builds the handle of a closed bundle. It resolves to `output_future`'s outputs once both
    /// handles resolved, after finishing the bundle and releasing the held watermark.
    fn bundle_completion<E>(
        &self,
        previous_results: OutputFuture<T>,
        output_future: OutputFuture<T>,
        watermark_hold: Option<Watermark>,
        emitter: E,
    ) -> OutputFuture<T>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        let listener = Arc::clone(&self.listener);
        let pending_bundle_count = Arc::clone(&self.pending_bundle_count);
        let bundle_completed = Arc::clone(&self.bundle_completed);

        async move {
            let (_, outputs) = future::try_join(previous_results, output_future).await?;

            listener.on_bundle_finished(&emitter)?;
            if let Some(watermark) = watermark_hold {
                listener.on_watermark(watermark, &emitter)?;
            }

            let pending = pending_bundle_count
                .fetch_sub(1, Ordering::SeqCst)
                .saturating_sub(1);
            bundle_completed.notify_one();
            debug!(pending, "Bundle finished");
            Ok::<_, Error>(outputs)
        }
        .boxed()
        .shared()
    }

    /// Propagates a held watermark once no bundle is in progress or pending. A watermark arriving
    /// after the last close was decided stays held otherwise until the next bundle closes.
    /// Returns whether a watermark was released.
    pub fn try_release_watermark_hold<E>(&self, emitter: &E) -> Result<bool>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if self.bundle_started.load(Ordering::SeqCst)
            || self.pending_bundle_count.load(Ordering::SeqCst) != 0
        {
            return Ok(false);
        }
        let Some(watermark) = self.watermark_hold.lock().take() else {
            return Ok(false);
        };
        debug!(%watermark, "Releasing held watermark");
        self.listener.on_watermark(watermark, emitter)?;
        Ok(true)
    }

    fn should_finish_bundle(&self) -> bool {
        if !self.bundle_started.load(Ordering::SeqCst) {
            return false;
        }
        if self.current_bundle_element_count.load(Ordering::SeqCst) >= self.max_bundle_size {
            return true;
        }
        let start = self.bundle_start_time.load(Ordering::SeqCst);
        start != IDLE_BUNDLE_START
            && self.elapsed_millis().saturating_sub(start)
                >= self.max_bundle_time.as_millis() as u64
    }

    fn elapsed_millis(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_millis() as u64
    }

    /// Waits until a pending bundle completes. A completion that happened since the last wait is
    /// observed right away.
    pub async fn wait_for_bundle_completion(&self) {
        self.bundle_completed.notified().await;
    }

    /// No bundle in progress, none pending, and no watermark held.
    pub fn is_idle(&self) -> bool {
        !self.bundle_started.load(Ordering::SeqCst)
            && self.pending_bundle_count.load(Ordering::SeqCst) == 0
            && self.watermark_hold.lock().is_none()
    }

    pub fn current_bundle_element_count(&self) -> u64 {
        self.current_bundle_element_count.load(Ordering::SeqCst)
    }

    pub fn pending_bundle_count(&self) -> u64 {
        self.pending_bundle_count.load(Ordering::SeqCst)
    }

    pub fn is_bundle_started(&self) -> bool {
        self.bundle_started.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn bundle_start_time(&self) -> u64 {
        self.bundle_start_time.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn held_watermark(&self) -> Option<Watermark> {
        *self.watermark_hold.lock()
    }
}
