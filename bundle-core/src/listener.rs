use crate::Result;
use crate::emitter::OutputEmitter;
use crate::watermark::Watermark;

/// Tracks the lifecycle of a bundle. Implemented by the operator owning the
/// [`BundleManager`](crate::bundle::BundleManager).
///
/// [`on_bundle_finished`](BundleProgressListener::on_bundle_finished) and
/// [`on_watermark`](BundleProgressListener::on_watermark) may be invoked from a runtime worker
/// thread once the outputs of a bundle resolve, never concurrently for the same bundle.
pub trait BundleProgressListener<T>: Send + Sync {
    /// Invoked once per bundle, synchronously when its first element arrives.
    fn on_bundle_started(&self) -> Result<()>;

    /// Invoked once per bundle, after the outputs of all its elements have resolved.
    fn on_bundle_finished(&self, emitter: &dyn OutputEmitter<T>) -> Result<()>;

    /// Invoked when `watermark` is safe to propagate downstream.
    fn on_watermark(&self, watermark: Watermark, emitter: &dyn OutputEmitter<T>) -> Result<()>;
}
