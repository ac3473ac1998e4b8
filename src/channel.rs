//! Command and event plumbing between callers and the control thread.
//!
//! Commands travel through a bounded FIFO that blocks producers when full.
//! Internal worker notices share the same FIFO but never count against its
//! capacity, so a worker can always report progress to a control thread that
//! may itself be waiting on that worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::models::Event;

/// Receiving half handed to subscribers
pub type EventReceiver = UnboundedReceiver<Event>;

/// Returned by pushes on a closed queue, giving the item back
#[derive(Debug)]
pub struct Closed<T>(pub T);

struct Entry<T> {
    item: T,
    counted: bool,
}

struct QueueState<T> {
    items: VecDeque<Entry<T>>,
    counted: usize,
    closed: bool,
}

/// Bounded multi-producer single-consumer FIFO
pub struct CommandQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> CommandQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                counted: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a caller command, blocking while the queue is at capacity
    pub fn push(&self, item: T) -> Result<(), Closed<T>> {
        let mut state = self.lock();
        while !state.closed && state.counted >= self.capacity {
            trace!("command queue full ({}), producer waiting", self.capacity);
            state = self.not_full.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        if state.closed {
            return Err(Closed(item));
        }
        state.counted += 1;
        state.items.push_back(Entry { item, counted: true });
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue an internal notice without waiting for capacity
    pub fn push_notice(&self, item: T) -> Result<(), Closed<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Closed(item));
        }
        state.items.push_back(Entry { item, counted: false });
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the next item, blocking until one arrives.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = self.take_front(&mut state) {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = self.take_front(&mut state) {
                return Some(item);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    fn take_front(&self, state: &mut QueueState<T>) -> Option<T> {
        let entry = state.items.pop_front()?;
        if entry.counted {
            state.counted -= 1;
            self.not_full.notify_one();
        }
        Some(entry.item)
    }

    /// Reject further pushes and wake every waiter. Queued items stay poppable.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Remove everything still queued
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.lock();
        state.counted = 0;
        let items = state.items.drain(..).map(|entry| entry.item).collect();
        drop(state);
        self.not_full.notify_all();
        items
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
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
}

/// Lossless fan-out of engine events to any number of subscribers
pub struct EventBus {
    subscribers: Mutex<Option<Vec<UnboundedSender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a subscriber. After `close` the returned receiver is already finished.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subscribers.as_mut() {
            list.push(tx);
        }
        rx
    }

    /// Deliver an event to every live subscriber, in publish order
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = subscribers.as_mut() {
            // Receivers that were dropped are pruned here
            list.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Drop every sender so receivers end after draining what was already published
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.take();
    }

    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
