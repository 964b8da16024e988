//! The timer/scheduler collaborator (spec §9): "an abstract scheduler
//! interface with `schedule(delay, callback) -> handle` and `cancel(handle)`;
//! all timers in this core are single-shot."
//!
//! `ReaderRdy` and `ConnectionRdy` never sleep inline — every deferred action
//! (backoff expiry, the low-RDY idle surrender, the low-RDY periodic
//! rebalance) is scheduled here and delivered back as a fresh event on the
//! same mailbox (spec §5).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A single in-flight timer. Dropping or replacing it without calling
/// [`TimerHandle::cancel`] leaks the underlying task only until it fires (it
/// is always a short, bounded sleep), but `Scheduler::schedule` callers are
/// expected to cancel the previous handle before scheduling a new one, per
/// spec §5's "each scheduler call first cancels the prior handle".
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Schedules a single event, of type `E`, to be delivered on `tx` after
/// `delay`. Implemented directly over `tokio::time` + `JoinHandle::abort`,
/// which gives single-shot, cancellable timers without a separate runtime
/// abstraction.
pub fn schedule<E>(delay: Duration, tx: mpsc::UnboundedSender<E>, event: E) -> TimerHandle
where
    E: Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // The receiver may already be gone (actor shut down); that is not an
        // error for a timer, it just means the event has nowhere to land.
        let _ = tx.send(event);
    });

    TimerHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = schedule(Duration::from_millis(500), tx, "fired");

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some("fired"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = schedule(Duration::from_millis(500), tx, "fired");
        handle.cancel();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
