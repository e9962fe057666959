//! Aggregate result handles. An [`OutputFuture`] resolves once every output it represents has
//! resolved. Handles are [`Shared`] so the same handle can be queued for a bundle close and handed
//! downstream at the same time.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::{Error, Result};

/// Resolved outputs of one or more elements.
pub type Outputs<T> = Arc<Vec<T>>;

/// Aggregate result handle. Cloning is cheap and every clone observes the same result.
pub type OutputFuture<T> = Shared<BoxFuture<'static, Result<Outputs<T>>>>;

/// Creates an already-resolved handle.
pub fn ready<T>(outputs: Vec<T>) -> OutputFuture<T>
where
    T: Send + Sync + 'static,
{
    future::ready(Ok(Arc::new(outputs))).boxed().shared()
}

/// Creates an already-failed handle.
pub fn failed<T>(error: Error) -> OutputFuture<T>
where
    T: Send + Sync + 'static,
{
    future::ready(Err(error)).boxed().shared()
}

/// Wraps an asynchronous computation of outputs into a handle.
pub fn from_future<T, F>(fut: F) -> OutputFuture<T>
where
    T: Send + Sync + 'static,
    F: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    fut.map(|res| res.map(Arc::new)).boxed().shared()
}

/// Combines handles into one that resolves to their concatenated outputs, in handle order. Fails
/// with the first failure observed. Never blocks, an empty input resolves immediately.
pub fn flatten<T>(handles: Vec<OutputFuture<T>>) -> OutputFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    match handles.len() {
        0 => ready(Vec::new()),
        // a single handle already is the aggregate
        1 => handles.into_iter().next().unwrap_or_else(|| ready(Vec::new())),
        _ => async move {
            let resolved = future::try_join_all(handles).await?;
            let outputs = resolved
                .iter()
                .flat_map(|outputs| outputs.iter().cloned())
                .collect::<Vec<_>>();
            Ok(Arc::new(outputs))
        }
        .boxed()
        .shared(),
    }
}
