//! The sink to which the operator hands its results. Results of a bundle are handed over as
//! [`OutputFuture`]s which may still be pending, in the order they were produced. The downstream
//! [`OrderedOutput`] re-sequences them so consumers observe submission order rather than
//! completion order.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::warn;

use crate::output::OutputFuture;
use crate::watermark::Watermark;
use crate::{Error, Result};

/// Output Emitter. Implementations must not block, they are invoked from the driving thread as
/// well as from bundle completion continuations.
pub trait OutputEmitter<T>: Send + Sync {
    /// Emits a single already-computed element.
    fn emit_element(&self, element: T) -> Result<()>;

    /// Propagates a watermark downstream.
    fn emit_watermark(&self, watermark: Watermark) -> Result<()>;

    /// Hands a possibly pending result handle downstream. Order of calls is preserved.
    fn emit_future(&self, output: OutputFuture<T>) -> Result<()>;
}

/// Everything an [`OutputEmitter`] can hand downstream.
pub enum OutputEvent<T> {
    Element(T),
    Watermark(Watermark),
    Future(OutputFuture<T>),
}

/// Emitter backed by an unbounded channel, so emitting never blocks.
pub struct ChannelEmitter<T> {
    sender: mpsc::UnboundedSender<OutputEvent<T>>,
}

impl<T> Clone for ChannelEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> ChannelEmitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates the emitter and the ordered downstream reader of everything emitted through it.
    pub fn new() -> (Self, OrderedOutput<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, OrderedOutput::new(receiver))
    }

    fn send(&self, event: OutputEvent<T>) -> Result<()> {
        self.sender.send(event).map_err(|_| {
            warn!("Output receiver is closed, dropping emitted output");
            Error::Emitter("output receiver is closed".to_string())
        })
    }
}

impl<T> OutputEmitter<T> for ChannelEmitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn emit_element(&self, element: T) -> Result<()> {
        self.send(OutputEvent::Element(element))
    }

    fn emit_watermark(&self, watermark: Watermark) -> Result<()> {
        self.send(OutputEvent::Watermark(watermark))
    }

    fn emit_future(&self, output: OutputFuture<T>) -> Result<()> {
        self.send(OutputEvent::Future(output))
    }
}

/// What a downstream consumer observes, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Output<T> {
    Element(T),
    Watermark(Watermark),
}

/// Downstream reader that releases outputs strictly in the order they were emitted. A pending
/// future holds back everything emitted after it, and its resolved collection is buffered and
/// released element by element.
pub struct OrderedOutput<T> {
    receiver: mpsc::UnboundedReceiver<OutputEvent<T>>,
    buffered: VecDeque<T>,
}

impl<T> OrderedOutput<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(receiver: mpsc::UnboundedReceiver<OutputEvent<T>>) -> Self {
        Self {
            receiver,
            buffered: VecDeque::new(),
        }
    }

    /// Returns the next output, or `None` once every emitter is dropped and everything has been
    /// released. A failed future is returned as `Err` and reading can continue after it.
    pub async fn next(&mut self) -> Option<Result<Output<T>>> {
        loop {
            if let Some(element) = self.buffered.pop_front() {
                return Some(Ok(Output::Element(element)));
            }

            match self.receiver.recv().await? {
                OutputEvent::Element(element) => return Some(Ok(Output::Element(element))),
                OutputEvent::Watermark(watermark) => {
                    return Some(Ok(Output::Watermark(watermark)));
                }
                OutputEvent::Future(output) => match output.await {
                    Ok(outputs) => self.buffered.extend(outputs.iter().cloned()),
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }

    /// Reads until the stream ends, collecting successful outputs and stopping at the first
    /// failure.
    pub async fn collect(mut self) -> Result<Vec<Output<T>>> {
        let mut outputs = Vec::new();
        while let Some(output) = self.next().await {
            outputs.push(output?);
        }
        Ok(outputs)
    }
}
