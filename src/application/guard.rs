use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Event channel that doubles as the session's armed flag.
///
/// The session is armed exactly while the sender is present. Disarming drops
/// the sender, which closes the consumer's stream once buffered events are
/// read, and because every send takes the same lock no event can be emitted
/// after [`EventSink::disarm`] returns.
pub(crate) struct EventSink<E> {
    tx: Mutex<Option<mpsc::UnboundedSender<E>>>,
}

impl<E> EventSink<E> {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (sink, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<E>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Returns whether the sink was armed before the call.
    pub(crate) fn disarm(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Returns whether the sink was armed. A consumer that dropped its
    /// receiver does not disarm the session.
    pub(crate) fn emit(&self, event: E) -> bool {
        match self.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(event);
                true
            }
            None => false,
        }
    }

    /// Sends the last event of a session and disarms in one step.
    pub(crate) fn emit_final(&self, event: E) -> bool {
        match self.lock().take() {
            Some(tx) => {
                let _ = tx.send(event);
                true
            }
            None => false,
        }
    }

    /// Runs `f` only while armed, holding the lock so a concurrent disarm
    /// waits for it.
    pub(crate) fn guarded<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let tx = self.lock();
        tx.is_some().then(f)
    }

    /// Like [`EventSink::guarded`], but sends whatever `f` builds.
    pub(crate) fn emit_with(&self, f: impl FnOnce() -> E) -> bool {
        match self.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(f());
                true
            }
            None => false,
        }
    }

    /// Runs `f` under the lock whether armed or not, and sends the event it
    /// returns only while armed.
    pub(crate) fn publish<T>(&self, f: impl FnOnce() -> (T, Option<E>)) -> T {
        let tx = self.lock();
        let (output, event) = f();
        if let (Some(tx), Some(event)) = (tx.as_ref(), event) {
            let _ = tx.send(event);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarm_blocks_events_and_closes_stream() {
        let (sink, mut rx) = EventSink::new();
        assert!(sink.emit(1));
        assert!(sink.disarm());
        assert!(!sink.disarm());
        assert!(!sink.emit(2));
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(
            rx.try_recv().unwrap_err(),
            mpsc::error::TryRecvError::Disconnected
        );
    }

    #[test]
    fn test_emit_final_disarms() {
        let (sink, mut rx) = EventSink::new();
        assert!(sink.emit_final("done"));
        assert!(!sink.is_armed());
        assert!(!sink.emit("late"));
        assert_eq!(rx.try_recv().unwrap(), "done");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_guarded_skips_when_disarmed() {
        let (sink, _rx) = EventSink::<()>::new();
        assert_eq!(sink.guarded(|| 7), Some(7));
        sink.disarm();
        let mut ran = false;
        assert_eq!(sink.guarded(|| ran = true), None);
        assert!(!ran);
    }

    #[test]
    fn test_emit_with_builds_only_when_armed() {
        let (sink, mut rx) = EventSink::new();
        assert!(sink.emit_with(|| "built"));
        sink.disarm();
        assert!(!sink.emit_with(|| unreachable!()));
        assert_eq!(rx.try_recv().unwrap(), "built");
    }

    #[test]
    fn test_publish_runs_even_when_disarmed() {
        let (sink, mut rx) = EventSink::new();
        assert_eq!(sink.publish(|| (1, Some("first"))), 1);
        sink.disarm();
        assert_eq!(sink.publish(|| (2, Some("second"))), 2);
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_keeps_sink_armed() {
        let (sink, rx) = EventSink::new();
        drop(rx);
        assert!(sink.emit(1));
        assert!(sink.is_armed());
    }
}
