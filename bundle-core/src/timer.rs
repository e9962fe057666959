//! Processing-time timers. The bundle manager only uses them as a periodic wake-up to check
//! whether the active bundle has exceeded its time budget.

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A fired processing-time timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub timer_id: String,
    /// Time the timer was scheduled for.
    pub timestamp: Instant,
}

/// Timer Scheduler. Scheduling never blocks, the timer is delivered to the owning operator when
/// it fires.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, timer_id: &str, at: Instant);
}

/// Timer channel size, only a handful of internal timers are ever outstanding.
const TIMER_CHANNEL_SIZE: usize = 16;

/// [`TimerScheduler`] firing each timer from its own tokio task.
#[derive(Clone)]
pub struct TokioTimerScheduler {
    sender: mpsc::Sender<TimerEvent>,
    cln_token: CancellationToken,
}

impl TokioTimerScheduler {
    /// Creates the scheduler and the receiver fired timers are delivered to. Outstanding timers
    /// are dropped once `cln_token` is cancelled.
    pub fn new(cln_token: CancellationToken) -> (Self, mpsc::Receiver<TimerEvent>) {
        let (sender, receiver) = mpsc::channel(TIMER_CHANNEL_SIZE);
        (Self { sender, cln_token }, receiver)
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, timer_id: &str, at: Instant) {
        let sender = self.sender.clone();
        let cln_token = self.cln_token.clone();
        let event = TimerEvent {
            timer_id: timer_id.to_string(),
            timestamp: at,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = cln_token.cancelled() => {
                    debug!(timer_id = %event.timer_id, "Timer cancelled before firing");
                }
                _ = sleep_until(at) => {
                    if sender.send(event).await.is_err() {
                        warn!("Timer receiver is closed, dropping fired timer");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_scheduled_time() {
        let (scheduler, mut timers) = TokioTimerScheduler::new(CancellationToken::new());
        let at = Instant::now() + Duration::from_millis(100);
        scheduler.schedule("check", at);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(timers.try_recv().is_err());

        let fired = timers.recv().await.unwrap();
        assert_eq!(fired.timer_id, "check");
        assert_eq!(fired.timestamp, at);
        assert!(Instant::now() >= at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let cln_token = CancellationToken::new();
        let (scheduler, mut timers) = TokioTimerScheduler::new(cln_token.clone());
        scheduler.schedule("check", Instant::now() + Duration::from_millis(100));
        cln_token.cancel();
        drop(scheduler);

        // every sender is gone once the timer task exits
        assert!(timers.recv().await.is_none());
    }
}
