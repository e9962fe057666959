//! [`BundleOperator`] hosts a user [`Processor`] and drives the [`BundleManager`] from a single
//! task. Every element is wrapped in a bundle start/finish attempt, watermarks are held back while
//! bundles are in progress, and the internal bundle-check timer closes bundles that ran out of
//! time.
//!
//! Error handling: any error from the bundle lifecycle or the emitter is fatal, the operator stops
//! reading and returns it through its join handle. Failures of element outputs are not inspected
//! here, they surface downstream through the output handles, and the downstream is expected to
//! cancel the token to stop the operator.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::bundle::BundleManager;
use crate::collector::{FutureCollector, OutputFutureCollector};
use crate::config::BundleConfig;
use crate::emitter::OutputEmitter;
use crate::listener::BundleProgressListener;
use crate::output;
use crate::timer::{TimerEvent, TokioTimerScheduler};
use crate::watermark::Watermark;

/// User processing logic hosted by the operator.
pub trait Processor<I, T>: Send + Sync + 'static {
    /// Processes one element. The returned future may resolve after later elements have been
    /// handed in.
    fn process(&self, element: I) -> BoxFuture<'static, Result<Vec<T>>>;

    /// Invoked when a bundle starts, before its first element is processed.
    fn start_bundle(&self) -> Result<()> {
        Ok(())
    }

    /// Invoked once all outputs of the bundle have resolved. May emit additional elements.
    fn finish_bundle(&self, _emitter: &dyn OutputEmitter<T>) -> Result<()> {
        Ok(())
    }
}

/// Input of the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent<I> {
    Element(I),
    Watermark(Watermark),
}

/// Forwards the bundle lifecycle to the processor and watermarks to the emitter.
struct ProcessorListener<I, T> {
    processor: Arc<dyn Processor<I, T>>,
}

impl<I, T> BundleProgressListener<T> for ProcessorListener<I, T>
where
    I: 'static,
    T: 'static,
{
    fn on_bundle_started(&self) -> Result<()> {
        self.processor.start_bundle()
    }

    fn on_bundle_finished(&self, emitter: &dyn OutputEmitter<T>) -> Result<()> {
        self.processor.finish_bundle(emitter)
    }

    fn on_watermark(&self, watermark: Watermark, emitter: &dyn OutputEmitter<T>) -> Result<()> {
        emitter.emit_watermark(watermark)
    }
}

pub struct BundleOperator<I, T> {
    manager: BundleManager<T>,
    collector: Arc<OutputFutureCollector<T>>,
    processor: Arc<dyn Processor<I, T>>,
    timers: mpsc::Receiver<TimerEvent>,
    /// Latest watermark received on the input.
    input_watermark: Watermark,
    /// Stops the outstanding internal timers once the operator is dropped.
    _timer_guard: DropGuard,
}

impl<I, T> BundleOperator<I, T>
where
    I: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates the operator. Must be called within a tokio runtime, the first bundle check may
    /// be scheduled right away.
    pub fn new<P>(config: &BundleConfig, processor: P) -> Self
    where
        P: Processor<I, T>,
    {
        let processor: Arc<dyn Processor<I, T>> = Arc::new(processor);
        let timer_token = CancellationToken::new();
        let (scheduler, timers) = TokioTimerScheduler::new(timer_token.clone());
        let collector = Arc::new(OutputFutureCollector::new());
        let listener = ProcessorListener {
            processor: Arc::clone(&processor),
        };

        let manager = BundleManager::new(
            config,
            Arc::new(listener),
            Arc::clone(&collector) as Arc<dyn FutureCollector<T>>,
            Arc::new(scheduler),
        );

        Self {
            manager,
            collector,
            processor,
            timers,
            input_watermark: Watermark::MIN,
            _timer_guard: timer_token.drop_guard(),
        }
    }

    /// Processes the input stream and hands results to `emitter` until the input ends or the
    /// token is cancelled. Once the input ends it is treated as bounded, the end-of-stream
    /// watermark is processed and the operator waits for every bundle to complete before exiting.
    pub fn streaming_process<E>(
        mut self,
        input: ReceiverStream<InputEvent<I>>,
        emitter: E,
        cln_token: CancellationToken,
    ) -> JoinHandle<Result<()>>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        tokio::spawn(async move {
            info!("Bundle operator started");
            let result = self.run(input, &emitter, &cln_token).await;
            match &result {
                Ok(()) => info!("Bundle operator stopped"),
                Err(e) => error!(?e, "Bundle operator failed"),
            }
            result
        })
    }

    async fn run<E>(
        &mut self,
        mut input: ReceiverStream<InputEvent<I>>,
        emitter: &E,
        cln_token: &CancellationToken,
    ) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        loop {
            tokio::select! {
                biased;
                _ = cln_token.cancelled() => {
                    info!("Cancellation token is cancelled, stopping the operator");
                    return Ok(());
                }
                Some(timer) = self.timers.recv() => {
                    self.manager.process_timer(&timer, emitter)?;
                }
                event = input.next() => match event {
                    Some(InputEvent::Element(element)) => self.process_element(element, emitter)?,
                    Some(InputEvent::Watermark(watermark)) => {
                        self.process_watermark(watermark, emitter)?;
                    }
                    None => break,
                },
            }
        }

        info!("Input stream ended, draining in-flight bundles");
        self.drain(emitter, cln_token).await
    }

    fn process_element<E>(&self, element: I, emitter: &E) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if let Err(e) = self.manager.try_start_bundle() {
            // the element is never processed, drop the slot prepared for it
            self.collector.discard();
            return Err(e);
        }
        let output = output::from_future(self.processor.process(element));
        self.collector.add(output)?;
        self.manager.try_finish_bundle(emitter)
    }

    fn process_watermark<E>(&mut self, watermark: Watermark, emitter: &E) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if watermark < self.input_watermark {
            debug!(%watermark, current = %self.input_watermark, "Ignoring regressing watermark");
            return Ok(());
        }
        self.input_watermark = watermark;
        self.manager.process_watermark(watermark, emitter)
    }

    /// Flushes the end-of-stream watermark and waits until no bundle is in progress or pending
    /// and nothing is held.
    async fn drain<E>(&mut self, emitter: &E, cln_token: &CancellationToken) -> Result<()>
    where
        E: OutputEmitter<T> + Clone + 'static,
    {
        if !self.input_watermark.is_end_of_stream() {
            self.process_watermark(Watermark::END_OF_STREAM, emitter)?;
        }

        loop {
            self.manager.try_release_watermark_hold(emitter)?;
            if self.manager.is_idle() {
                return Ok(());
            }

            tokio::select! {
                _ = cln_token.cancelled() => {
                    warn!(
                        pending = self.manager.pending_bundle_count(),
                        "Cancellation token is cancelled while draining, pending bundles are dropped"
                    );
                    return Ok(());
                }
                Some(timer) = self.timers.recv() => {
                    self.manager.process_timer(&timer, emitter)?;
                }
                _ = self.manager.wait_for_bundle_completion() => {}
            }
        }
    }
}
