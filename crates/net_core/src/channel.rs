//! Byte channels used to hand data between I/O threads and the step.
//!
//! Thin wrappers over `crossbeam_channel` exposing only the non-blocking
//! operations the simulation side is allowed to use, plus blocking send and
//! receive for the I/O threads.

use crossbeam_channel::{self as cb, Receiver, Sender};

use crate::transport::{Disconnected, TrySendError};

#[derive(Clone, Debug)]
pub struct Tx(pub Sender<Vec<u8>>);
#[derive(Clone, Debug)]
pub struct Rx(pub Receiver<Vec<u8>>);

/// Create a bounded pair; `try_send` reports `Full` once `capacity` messages
/// are queued.
#[must_use]
pub fn channel_bounded(capacity: usize) -> (Tx, Rx) {
    let (s, r) = cb::bounded::<Vec<u8>>(capacity.max(1));
    (Tx(s), Rx(r))
}

impl Tx {
    pub fn try_send(&self, bytes: Vec<u8>) -> Result<(), TrySendError> {
        self.0.try_send(bytes).map_err(|e| match e {
            cb::TrySendError::Full(_) => TrySendError::Full,
            cb::TrySendError::Disconnected(_) => TrySendError::Disconnected,
        })
    }

    /// Blocking send for I/O threads; waits while a bounded queue is full.
    pub fn send_blocking(&self, bytes: Vec<u8>) -> Result<(), Disconnected> {
        self.0.send(bytes).map_err(|_| Disconnected)
    }
}

impl Rx {
    /// Non-blocking receive. `Ok(None)` means nothing is queued right now.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>, Disconnected> {
        match self.0.try_recv() {
            Ok(b) => Ok(Some(b)),
            Err(cb::TryRecvError::Empty) => Ok(None),
            Err(cb::TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    /// Blocking receive for I/O threads; `None` once every sender is gone.
    #[must_use]
    pub fn recv_blocking(&self) -> Option<Vec<u8>> {
        self.0.recv().ok()
    }

    /// Drain all currently queued messages.
    #[must_use]
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.0.try_iter().collect()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_drain() {
        let (tx, rx) = channel_bounded(8);
        tx.try_send(vec![1, 2, 3]).expect("send");
        tx.try_send(vec![4, 5]).expect("send");
        assert_eq!(rx.depth(), 2);
        let drained = rx.drain();
        assert_eq!(drained, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn bounded_reports_full_then_disconnected() {
        let (tx, rx) = channel_bounded(1);
        tx.try_send(vec![1]).expect("first fits");
        assert!(matches!(tx.try_send(vec![2]), Err(TrySendError::Full)));
        drop(rx);
        assert!(matches!(tx.try_send(vec![3]), Err(TrySendError::Disconnected)));
    }

    #[test]
    fn blocking_send_waits_for_room() {
        let (tx, rx) = channel_bounded(1);
        tx.send_blocking(vec![1]).expect("first fits");
        let writer = std::thread::spawn(move || tx.send_blocking(vec![2]));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(rx.depth(), 1);
        assert_eq!(rx.recv_blocking(), Some(vec![1]));
        writer.join().expect("join").expect("second lands");
        assert_eq!(rx.recv_blocking(), Some(vec![2]));
    }

    #[test]
    fn receiver_sees_disconnect_after_queue_empties() {
        let (tx, rx) = channel_bounded(8);
        tx.try_send(vec![9]).expect("send");
        drop(tx);
        assert_eq!(rx.try_recv(), Ok(Some(vec![9])));
        assert_eq!(rx.try_recv(), Err(Disconnected));
    }
}
