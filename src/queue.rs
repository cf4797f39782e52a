//! Bounded packet queues between the driver and the application.
//!
//! A [`PacketQueue`] is a cloneable handle to a FIFO of telegrams. The driver
//! never blocks on a queue: it takes outbound telegrams with
//! [`try_recv`](PacketQueue::try_recv) and drops inbound telegrams when the
//! queue is full. Applications may wait with
//! [`recv_timeout`](PacketQueue::recv_timeout).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use snafu::{ensure, Snafu};

use crate::{Telegram, MAX_TELEGRAM_LEN};

/// Name of the queue carrying telegrams to be sent on the bus.
pub const TX_QUEUE_NAME: &str = "/ems_bus_tx";

/// Name of the queue carrying telegrams received from the bus.
pub const RX_QUEUE_NAME: &str = "/ems_bus_rx";

/// Number of telegrams a queue holds.
pub const QUEUE_CAPACITY: usize = 32;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The queue is full.
    #[snafu(display("Queue {} is full", name))]
    Full { name: &'static str },
    /// Empty telegrams can't be queued.
    #[snafu(display("Empty telegram"))]
    EmptyTelegram,
    /// The telegram is longer than the message size of the queue.
    #[snafu(display("Telegram of {} bytes exceeds {} bytes", len, max))]
    TooLong { len: usize, max: usize },
    /// A queue must hold at least one telegram of at least one byte.
    #[snafu(display("Invalid geometry for queue {}", name))]
    InvalidGeometry { name: &'static str },
}

struct Inner {
    name: &'static str,
    capacity: usize,
    message_size: usize,
    messages: Mutex<VecDeque<Telegram>>,
    available: Condvar,
}

/// Handle to a bounded FIFO of telegrams.
#[derive(Clone)]
pub struct PacketQueue(Arc<Inner>);

impl PacketQueue {
    /// Create a queue with the default geometry.
    pub fn open(name: &'static str) -> Result<Self, Error> {
        Self::with_geometry(name, QUEUE_CAPACITY, MAX_TELEGRAM_LEN)
    }

    /// Create a queue holding `capacity` telegrams of at most `message_size` bytes.
    pub fn with_geometry(
        name: &'static str,
        capacity: usize,
        message_size: usize,
    ) -> Result<Self, Error> {
        ensure!(
            capacity > 0 && (1..=MAX_TELEGRAM_LEN).contains(&message_size),
            InvalidGeometrySnafu { name }
        );
        Ok(Self(Arc::new(Inner {
            name,
            capacity,
            message_size,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
        })))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Append a telegram without blocking.
    pub fn try_send(&self, telegram: &[u8]) -> Result<(), Error> {
        ensure!(!telegram.is_empty(), EmptyTelegramSnafu);
        ensure!(
            telegram.len() <= self.0.message_size,
            TooLongSnafu {
                len: telegram.len(),
                max: self.0.message_size
            }
        );
        let mut messages = self.lock();
        ensure!(
            messages.len() < self.0.capacity,
            FullSnafu { name: self.0.name }
        );
        messages.push_back(telegram.iter().copied().collect());
        drop(messages);
        self.0.available.notify_one();
        Ok(())
    }

    /// Take the oldest telegram, if any.
    pub fn try_recv(&self) -> Option<Telegram> {
        self.lock().pop_front()
    }

    /// Wait up to `timeout` for a telegram.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Telegram> {
        let messages = self.lock();
        let (mut messages, _) = self
            .0
            .available
            .wait_timeout_while(messages, timeout, |messages| messages.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Telegram>> {
        // A panicking holder can't leave a VecDeque half updated.
        self.0
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketQueue")
            .field("name", &self.0.name)
            .field("len", &self.len())
            .field("capacity", &self.0.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo() {
        let queue = PacketQueue::open(TX_QUEUE_NAME).unwrap();
        assert_eq!(queue.try_recv(), None);
        queue.try_send(&[0x01, 0x02]).unwrap();
        queue.try_send(&[0x03]).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(&queue.try_recv().unwrap()[..], &[0x01, 0x02]);
        assert_eq!(&queue.try_recv().unwrap()[..], &[0x03]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bounds() {
        let queue = PacketQueue::with_geometry(RX_QUEUE_NAME, 2, 8).unwrap();
        assert_eq!(queue.try_send(&[]), Err(Error::EmptyTelegram));
        assert_eq!(
            queue.try_send(&[0; 9]),
            Err(Error::TooLong { len: 9, max: 8 })
        );
        queue.try_send(&[1]).unwrap();
        queue.try_send(&[2]).unwrap();
        assert_eq!(
            queue.try_send(&[3]),
            Err(Error::Full {
                name: RX_QUEUE_NAME
            })
        );
        assert_eq!(&queue.try_recv().unwrap()[..], &[1]);
    }

    #[test]
    fn test_geometry() {
        assert!(PacketQueue::with_geometry(TX_QUEUE_NAME, 0, 32).is_err());
        assert!(PacketQueue::with_geometry(TX_QUEUE_NAME, 32, 0).is_err());
        assert!(PacketQueue::with_geometry(TX_QUEUE_NAME, 32, MAX_TELEGRAM_LEN + 1).is_err());
    }

    #[test]
    fn test_recv_timeout() {
        let queue = PacketQueue::open(RX_QUEUE_NAME).unwrap();
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), None);

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_send(&[0x08, 0x00]).unwrap();
        });
        let telegram = queue.recv_timeout(Duration::from_secs(5));
        assert_eq!(telegram.as_deref(), Some(&[0x08, 0x00][..]));
        handle.join().unwrap();
    }
}
