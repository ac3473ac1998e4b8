use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::models::DecodedFrame;

/// What travels from the decode thread to a renderer
#[derive(Debug)]
pub enum QueueItem {
    Frame(DecodedFrame),
    /// The source ran out of frames for this serial
    EndOfStream { serial: u64 },
}

impl QueueItem {
    pub fn serial(&self) -> u64 {
        match self {
            QueueItem::Frame(frame) => frame.serial,
            QueueItem::EndOfStream { serial } => *serial,
        }
    }
}

/// Why a push did not enqueue its item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRejected {
    /// The queue was flushed to a newer serial while the item was in flight
    Stale,
    /// The queue is being torn down
    Aborted,
}

struct FrameQueueState {
    items: VecDeque<QueueItem>,
    serial: u64,
    aborted: bool,
}

/// Bounded frame queue between the decode thread and one renderer.
///
/// A full queue blocks the producer. `flush` empties it, moves it to a new
/// serial and wakes a blocked producer, whose in-flight item is then rejected
/// as stale.
pub struct FrameQueue {
    name: &'static str,
    capacity: usize,
    state: Mutex<FrameQueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl FrameQueue {
    pub fn new(name: &'static str, capacity: usize, serial: u64) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            state: Mutex::new(FrameQueueState {
                items: VecDeque::with_capacity(capacity.max(1)),
                serial,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameQueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&self, item: QueueItem) -> Result<(), PushRejected> {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Err(PushRejected::Aborted);
            }
            if item.serial() != state.serial {
                return Err(PushRejected::Stale);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self.not_full.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Next item, or `None` when nothing arrived in time or the queue was aborted
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Discard queued frames and accept only `serial` from now on
    pub fn flush(&self, serial: u64) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.serial = serial;
        drop(state);
        self.not_full.notify_all();
        dropped
    }

    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        state.items.clear();
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn serial(&self) -> u64 {
        self.lock().serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioFrame;
    use std::sync::Arc;
    use std::thread;

    fn frame(ms: u64, serial: u64) -> QueueItem {
        let mut frame = DecodedFrame::audio(Duration::from_millis(ms), AudioFrame::new(vec![0.0; 2], 2, 48_000));
        frame.serial = serial;
        QueueItem::Frame(frame)
    }

    #[test]
    fn test_push_pop_in_order() {
        let queue = FrameQueue::new("audio", 3, 1);
        queue.push(frame(0, 1)).unwrap();
        queue.push(frame(20, 1)).unwrap();
        queue.push(QueueItem::EndOfStream { serial: 1 }).unwrap();

        assert_eq!(queue.len(), 3);
        match queue.pop_timeout(Duration::from_millis(10)) {
            Some(QueueItem::Frame(f)) => assert_eq!(f.pts, Duration::ZERO),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(queue.pop_timeout(Duration::from_millis(10)), Some(QueueItem::Frame(_))));
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Some(QueueItem::EndOfStream { serial: 1 })
        ));
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_stale_serial_rejected() {
        let queue = FrameQueue::new("video", 3, 2);
        assert_eq!(queue.push(frame(0, 1)), Err(PushRejected::Stale));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_blocks_until_pop() {
        let queue = Arc::new(FrameQueue::new("video", 1, 1));
        queue.push(frame(0, 1)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(frame(40, 1)))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_some());
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_flush_releases_blocked_producer_as_stale() {
        let queue = Arc::new(FrameQueue::new("audio", 1, 1));
        queue.push(frame(0, 1)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(frame(20, 1)))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.flush(2), 1);
        assert_eq!(producer.join().unwrap(), Err(PushRejected::Stale));
        assert!(queue.is_empty());
        assert_eq!(queue.serial(), 2);
        queue.push(frame(2000, 2)).unwrap();
    }

    #[test]
    fn test_abort_wakes_everyone() {
        let queue = Arc::new(FrameQueue::new("audio", 1, 1));
        queue.push(frame(0, 1)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(frame(20, 1)))
        };

        thread::sleep(Duration::from_millis(30));
        queue.abort();
        assert_eq!(producer.join().unwrap(), Err(PushRejected::Aborted));
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_none());
    }
}
