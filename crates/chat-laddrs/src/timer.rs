use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Heartbeat,
    Reconnect,
}

/// Message sent back to the runtime loop when a timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// A single cancelable timer.
///
/// Scheduling replaces the pending timer. Every schedule or cancel bumps the
/// generation, so a fire that was already queued before the cancel is
/// rejected by [`TimerSlot::accept`].
#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    generation: u64,
    stop: Option<CancellationToken>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerSlot {
    pub fn new(kind: TimerKind, fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            kind,
            generation: 0,
            stop: None,
            fired_tx,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.stop.is_some()
    }

    pub fn schedule(&mut self, delay: Duration) {
        self.cancel();

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let fired = TimerFired {
            kind: self.kind,
            generation: self.generation,
        };
        let fired_tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop_child.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = fired_tx.send(fired);
                }
            }
        });
        self.stop = Some(stop);
    }

    pub fn cancel(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Whether `fired` belongs to the currently armed timer. Accepting
    /// disarms the slot.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if fired.kind != self.kind || fired.generation != self.generation || self.stop.is_none() {
            return false;
        }
        self.stop = None;
        true
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::Heartbeat, tx);
        slot.schedule(Duration::from_millis(10));

        let fired = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert!(slot.accept(fired));
        assert!(!slot.is_armed());
        assert!(!slot.accept(fired), "a fire is accepted once");
    }

    #[tokio::test]
    async fn rescheduling_supersedes_pending_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::Reconnect, tx);
        slot.schedule(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the first fire is already queued when the timer is replaced
        slot.schedule(Duration::from_millis(5));
        let stale = rx.recv().await.expect("queued fire");
        assert!(!slot.accept(stale));

        let current = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("second timer should fire")
            .expect("channel open");
        assert!(slot.accept(current));
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::Heartbeat, tx);
        slot.schedule(Duration::from_millis(20));
        slot.cancel();

        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "cancelled timer must not fire"
        );
    }

    #[test]
    fn rejects_fires_of_other_kind() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::Heartbeat, tx);
        assert!(!slot.accept(TimerFired {
            kind: TimerKind::Reconnect,
            generation: 0,
        }));
    }
}
