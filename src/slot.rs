//! Latest-wins handoff between the capture worker and its consumers.
//!
//! Two variants live here:
//! - [`FrameSlot`]: a mutex-guarded `Option` holding the newest processed
//!   frame, with a condvar so consumers can wait for something newer.
//! - [`LatestQueue`]: a bounded channel that drops the oldest entry instead
//!   of blocking when full. Sources use it to cap their decode buffer.
//!
//! Neither ever blocks the writer on a reader.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::frame::ProcessedFrame;

struct SlotState {
    current: Option<ProcessedFrame>,
    closed: bool,
}

/// Single cell holding the most recently published frame.
///
/// Older frames are replaced without being queued. Readers either see the
/// previous frame or the new one, never a mix.
pub struct FrameSlot {
    state: Mutex<SlotState>,
    published: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                current: None,
                closed: false,
            }),
            published: Condvar::new(),
        }
    }

    // The guarded value is only ever replaced whole, so a poisoned lock
    // still holds a valid frame.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the current frame and wakes waiting readers.
    ///
    /// Frames older than the current one are ignored so readers never go
    /// backwards.
    pub fn publish(&self, frame: ProcessedFrame) {
        let mut state = self.lock();
        if let Some(current) = &state.current {
            if frame.sequence() < current.sequence() {
                return;
            }
        }
        state.current = Some(frame);
        drop(state);
        self.published.notify_all();
    }

    /// Returns a copy of the current frame, if one was published.
    pub fn latest(&self) -> Option<ProcessedFrame> {
        self.lock().current.clone()
    }

    /// Blocks until a frame newer than `after` is published.
    ///
    /// `after = None` accepts any frame. Returns `None` on timeout or when
    /// the slot is closed without a newer frame.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration) -> Option<ProcessedFrame> {
        let deadline = Instant::now() + timeout;
        let is_newer = |frame: &ProcessedFrame| after.map_or(true, |seq| frame.sequence() > seq);

        let mut state = self.lock();
        loop {
            if let Some(frame) = state.current.as_ref().filter(|f| is_newer(*f)) {
                return Some(frame.clone());
            }
            if state.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = match self.published.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Marks the slot closed and releases every waiting reader.
    ///
    /// The last frame stays readable through [`latest`](Self::latest).
    pub fn close(&self) {
        self.lock().closed = true;
        self.published.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded channel that overwrites its oldest entry when full.
///
/// A capacity of 0 is treated as 1: only the newest item is kept.
pub struct LatestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for LatestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> LatestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Pushes `item`, evicting the oldest entries until it fits.
    ///
    /// Returns how many entries were dropped.
    pub fn push(&self, mut item: T) -> usize {
        let mut dropped = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    /// Waits up to `timeout` for the oldest queued item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat, RawFrame};
    use std::sync::Arc;
    use std::thread;

    fn processed(sequence: u64) -> ProcessedFrame {
        let raw = RawFrame::new(vec![0; 3], 1, 1, PixelFormat::Rgb8);
        ProcessedFrame::new(Frame::new(raw, sequence, Instant::now()))
    }

    #[test]
    fn test_empty_slot_has_no_frame() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_latest_is_most_recent_publish() {
        let slot = FrameSlot::new();
        for seq in 0..10 {
            slot.publish(processed(seq));
            assert_eq!(slot.latest().map(|f| f.sequence()), Some(seq));
        }
    }

    #[test]
    fn test_older_publish_does_not_replace_newer() {
        let slot = FrameSlot::new();
        slot.publish(processed(5));
        slot.publish(processed(3));
        assert_eq!(slot.latest().unwrap().sequence(), 5);
    }

    #[test]
    fn test_publish_without_readers_is_bounded() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        for seq in 0..100_000 {
            slot.publish(processed(seq));
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(slot.latest().unwrap().sequence(), 99_999);
    }

    #[test]
    fn test_wait_newer_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        slot.publish(processed(0));

        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.publish(processed(1));
            })
        };

        let frame = slot.wait_newer(Some(0), Duration::from_secs(5));
        assert_eq!(frame.map(|f| f.sequence()), Some(1));
        writer.join().unwrap();
    }

    #[test]
    fn test_wait_newer_times_out() {
        let slot = FrameSlot::new();
        slot.publish(processed(4));
        let start = Instant::now();
        assert!(slot.wait_newer(Some(4), Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_releases_waiters() {
        let slot = Arc::new(FrameSlot::new());
        let reader = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait_newer(None, Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(reader.join().unwrap().is_none());
        assert!(slot.is_closed());
    }

    #[test]
    fn test_concurrent_reader_sees_monotonic_sequence() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for seq in 0..5_000 {
                    slot.publish(processed(seq));
                }
                slot.close();
            })
        };

        let mut last = None;
        while !slot.is_closed() {
            if let Some(frame) = slot.latest() {
                if let Some(prev) = last {
                    assert!(frame.sequence() >= prev);
                }
                last = Some(frame.sequence());
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_latest_queue_overwrites_oldest() {
        let queue = LatestQueue::new(2);
        assert_eq!(queue.push(1), 0);
        assert_eq!(queue.push(2), 0);
        assert_eq!(queue.push(3), 1);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_latest_queue_zero_depth_keeps_newest() {
        let queue = LatestQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Some(9));
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
    }
}
