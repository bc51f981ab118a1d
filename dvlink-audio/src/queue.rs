//! Lock-protected FIFO connecting two pipeline stages
//!
//! Each queue has one producer and one consumer. Consumers poll with a short
//! fixed sleep instead of blocking on a wake signal; the session abort flag
//! lets a waiting consumer give up when its producer has died.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Strict FIFO shared between threads
#[derive(Debug)]
pub struct FrameQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the next item, sleeping `retry` between polls
    ///
    /// Returns `None` once `abort` is raised and the queue is empty.
    pub fn pop_wait(&self, abort: &AtomicBool, retry: Duration) -> Option<T> {
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if abort.load(Ordering::SeqCst) {
                return None;
            }
            thread::sleep(retry);
        }
    }

    /// Like [`pop_wait`](Self::pop_wait), but also gives up once `deadline`
    /// passes with the queue still empty
    pub fn pop_wait_until(
        &self,
        abort: &AtomicBool,
        retry: Duration,
        deadline: Instant,
    ) -> Option<T> {
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if abort.load(Ordering::SeqCst) || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(retry);
        }
    }
}
