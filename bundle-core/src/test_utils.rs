//! Recording fixtures shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::emitter::{OutputEmitter, OutputEvent};
use crate::listener::BundleProgressListener;
use crate::output::{self, OutputFuture};
use crate::timer::TimerScheduler;
use crate::watermark::Watermark;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListenerEvent {
    Started,
    Finished,
    Watermark(Watermark),
}

/// Records every lifecycle callback and forwards watermarks to the emitter.
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, event: &ListenerEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub(crate) fn watermarks(&self) -> Vec<Watermark> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::Watermark(wm) => Some(*wm),
                _ => None,
            })
            .collect()
    }
}

impl<T> BundleProgressListener<T> for RecordingListener {
    fn on_bundle_started(&self) -> Result<()> {
        self.events.lock().push(ListenerEvent::Started);
        Ok(())
    }

    fn on_bundle_finished(&self, _emitter: &dyn OutputEmitter<T>) -> Result<()> {
        self.events.lock().push(ListenerEvent::Finished);
        Ok(())
    }

    fn on_watermark(&self, watermark: Watermark, emitter: &dyn OutputEmitter<T>) -> Result<()> {
        self.events.lock().push(ListenerEvent::Watermark(watermark));
        emitter.emit_watermark(watermark)
    }
}

/// Records every emitted event without resolving anything.
pub(crate) struct RecordingEmitter<T> {
    events: Arc<Mutex<Vec<OutputEvent<T>>>>,
}

impl<T> Clone for RecordingEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> RecordingEmitter<T> {
    pub(crate) fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn future_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, OutputEvent::Future(_)))
            .count()
    }

    pub(crate) fn watermarks(&self) -> Vec<Watermark> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Watermark(wm) => Some(*wm),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn futures(&self) -> Vec<OutputFuture<T>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Future(fut) => Some(fut.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T> OutputEmitter<T> for RecordingEmitter<T>
where
    T: Send + Sync,
{
    fn emit_element(&self, element: T) -> Result<()> {
        self.events.lock().push(OutputEvent::Element(element));
        Ok(())
    }

    fn emit_watermark(&self, watermark: Watermark) -> Result<()> {
        self.events.lock().push(OutputEvent::Watermark(watermark));
        Ok(())
    }

    fn emit_future(&self, output: OutputFuture<T>) -> Result<()> {
        self.events.lock().push(OutputEvent::Future(output));
        Ok(())
    }
}

/// Records scheduled timers without ever firing them.
#[derive(Default)]
pub(crate) struct RecordingTimerScheduler {
    scheduled: Mutex<Vec<(String, Instant)>>,
}

impl RecordingTimerScheduler {
    pub(crate) fn scheduled(&self) -> Vec<(String, Instant)> {
        self.scheduled.lock().clone()
    }
}

impl TimerScheduler for RecordingTimerScheduler {
    fn schedule(&self, timer_id: &str, at: Instant) {
        self.scheduled.lock().push((timer_id.to_string(), at));
    }
}

/// Output handle resolved by sending on the returned sender.
pub(crate) fn pending_output<T>() -> (oneshot::Sender<Vec<T>>, OutputFuture<T>)
where
    T: Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let fut = output::from_future(async move {
        rx.await
            .map_err(|e| Error::Process(format!("output sender dropped: {e}")))
    });
    (tx, fut)
}
