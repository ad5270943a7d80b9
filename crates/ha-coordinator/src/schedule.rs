//! Fixed-interval refresh trigger

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Background task ticking a coordinator on a fixed wall-clock interval
///
/// The first tick fires one interval after spawning. Each tick awaits the
/// refresh it starts; ticks that come due while a refresh is still running
/// are not made up, the next one fires on the following boundary. Overlap
/// between ticks and on-demand refreshes is prevented by the coordinator's
/// in-flight slot, not here.
pub(crate) struct PeriodicTrigger {
    handle: JoinHandle<()>,
    reset: Arc<Notify>,
}

impl PeriodicTrigger {
    /// Spawn the trigger loop
    ///
    /// `on_tick` returns `None` once the coordinator is gone, which ends the
    /// loop.
    pub(crate) fn spawn<F>(name: String, interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Option<BoxFuture<'static, ()>> + Send + 'static,
    {
        let reset = Arc::new(Notify::new());
        let reset_rx = reset.clone();

        let handle = tokio::spawn(async move {
            let mut deadline = deadline_after(Instant::now(), interval);
            debug!(coordinator = %name, ?interval, "Scheduled periodic refresh");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let Some(refresh) = on_tick() else {
                            debug!(coordinator = %name, "Coordinator dropped, stopping trigger");
                            break;
                        };
                        trace!(coordinator = %name, "Periodic refresh tick");
                        refresh.await;
                        deadline = next_boundary(deadline, interval, Instant::now());
                    }
                    _ = reset_rx.notified() => {
                        trace!(coordinator = %name, "Periodic refresh reset");
                        deadline = deadline_after(Instant::now(), interval);
                    }
                }
            }
        });

        Self { handle, reset }
    }

    /// Push the next tick out to one full interval from now
    pub(crate) fn reset(&self) {
        self.reset.notify_one();
    }

    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

/// Deadline used when `base + offset` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// First boundary of the `last + k * interval` grid strictly after `now`
fn next_boundary(last: Instant, interval: Duration, now: Instant) -> Instant {
    let interval_nanos = interval.as_nanos().max(1);
    let missed = now.saturating_duration_since(last).as_nanos() / interval_nanos;
    let offset = u64::try_from(interval_nanos * (missed + 1))
        .map(Duration::from_nanos)
        .unwrap_or(Duration::MAX);
    deadline_after(last, offset)
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_trigger(interval: Duration, work: Duration) -> (PeriodicTrigger, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let trigger = PeriodicTrigger::spawn("test".into(), interval, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(tokio::time::sleep(work).boxed())
        });
        (trigger, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let (_trigger, ticks) = counting_trigger(Duration::from_secs(60), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refresh_skips_missed_ticks() {
        // Each refresh takes 150s against a 60s interval
        let (_trigger, ticks) = counting_trigger(Duration::from_secs(60), Duration::from_secs(150));

        // Ticks at 60s, then at the first boundary after 210s, which is 240s
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_next_boundary() {
        let start = Instant::now();
        let minute = Duration::from_secs(60);
        assert_eq!(next_boundary(start, minute, start), start + minute);
        assert_eq!(
            next_boundary(start, minute, start + Duration::from_secs(150)),
            start + Duration::from_secs(180)
        );
        assert_eq!(
            next_boundary(start, minute, start + Duration::from_secs(120)),
            start + Duration::from_secs(180)
        );
    }

    #[test]
    fn test_next_boundary_with_tiny_interval() {
        let start = Instant::now();
        let now = start + Duration::from_secs(10);
        assert_eq!(
            next_boundary(start, Duration::from_nanos(1), now),
            now + Duration::from_nanos(1)
        );
    }

    #[test]
    fn test_deadline_after_saturates() {
        let start = Instant::now();
        assert!(deadline_after(start, Duration::MAX) > start);
        assert!(next_boundary(start, Duration::MAX, start) > start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_keeps_trigger_alive() {
        let (trigger, ticks) = counting_trigger(Duration::MAX, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        trigger.reset();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!trigger.handle.is_finished());
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_pushes_next_tick() {
        let (trigger, ticks) = counting_trigger(Duration::from_secs(60), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(50)).await;
        trigger.reset();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(41)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (trigger, ticks) = counting_trigger(Duration::from_secs(60), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(61)).await;
        trigger.cancel();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_exits_when_owner_gone() {
        let trigger = PeriodicTrigger::spawn("gone".into(), Duration::from_secs(1), || None);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(trigger.handle.is_finished());
    }
}
