//! Per-subscriber bounded queue and the poll-on-distribute variable.

use super::domain::AsyncVariable;
use crate::accessor::NDRegisterAccessor;
use crate::data_types::{DataValidity, UserType};
use crate::error::{Error, Result};
use crate::version_number::VersionNumber;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Depth of a subscriber queue before the oldest element is dropped.
pub const PUSH_QUEUE_DEPTH: usize = 3;

/// One distributed update.
#[derive(Debug, Clone)]
pub struct Payload<T> {
    pub data: Vec<Vec<T>>,
    pub validity: DataValidity,
    pub version: VersionNumber,
}

#[derive(Debug)]
pub enum QueueItem<T> {
    Data(Payload<T>),
    Error(Error),
}

/// Bounded single-producer/single-consumer queue between a distribution
/// domain and one push accessor.
///
/// Overflow is lossy: the oldest element is replaced and the loss is flagged
/// to the consumer.
pub struct PushChannel<T> {
    queue: ArrayQueue<QueueItem<T>>,
    gate: Mutex<()>,
    available: Condvar,
    data_lost: AtomicBool,
}

impl<T: Send> PushChannel<T> {
    pub fn new() -> Self {
        PushChannel {
            queue: ArrayQueue::new(PUSH_QUEUE_DEPTH),
            gate: Mutex::new(()),
            available: Condvar::new(),
            data_lost: AtomicBool::new(false),
        }
    }

    fn push_item(&self, item: QueueItem<T>) {
        if self.queue.force_push(item).is_some() {
            self.data_lost.store(true, Ordering::Relaxed);
            log::warn!("push queue overflow, dropping the oldest update");
        }
        // take the gate so a consumer between its empty check and the wait
        // cannot miss this notification
        let _gate = self.gate.lock().unwrap();
        self.available.notify_all();
    }

    pub fn push_payload(&self, payload: Payload<T>) {
        self.push_item(QueueItem::Data(payload));
    }

    pub fn push_error(&self, error: Error) {
        self.push_item(QueueItem::Error(error));
    }

    /// Blocks until an item is available.
    pub fn pop_blocking(&self) -> QueueItem<T> {
        if let Some(item) = self.queue.pop() {
            return item;
        }
        let mut gate = self.gate.lock().unwrap();
        loop {
            if let Some(item) = self.queue.pop() {
                return item;
            }
            gate = self.available.wait(gate).unwrap();
        }
    }

    pub fn pop(&self) -> Option<QueueItem<T>> {
        self.queue.pop()
    }

    /// Drains the queue; returns the newest item, if any.
    pub fn pop_latest(&self) -> Option<QueueItem<T>> {
        let mut latest = None;
        while let Some(item) = self.queue.pop() {
            latest = Some(item);
        }
        latest
    }

    /// Returns and clears the overflow flag.
    pub fn take_data_lost(&self) -> bool {
        self.data_lost.swap(false, Ordering::Relaxed)
    }
}

impl<T: Send> Default for PushChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Domain-side variable that polls a register through a plain synchronous
/// accessor and pushes the result into its subscriber's queue.
///
/// The poll accessor must not be exception-decorated: a fault during
/// distribution is handled by the dispatcher after the domain lock is
/// released, never from inside it.
pub struct PollingAsyncVariable<T: UserType> {
    poller: Box<dyn NDRegisterAccessor<T>>,
    channel: Arc<PushChannel<T>>,
}

impl<T: UserType> PollingAsyncVariable<T> {
    pub fn new(poller: Box<dyn NDRegisterAccessor<T>>, channel: Arc<PushChannel<T>>) -> Self {
        PollingAsyncVariable { poller, channel }
    }
}

impl<T: UserType> AsyncVariable for PollingAsyncVariable<T> {
    fn fill_and_push(&mut self, version: VersionNumber) -> Result<()> {
        self.poller.read()?;
        self.channel.push_payload(Payload {
            data: self.poller.buffer().clone(),
            validity: self.poller.data_validity(),
            version,
        });
        Ok(())
    }

    fn send_exception(&self, error: &Error) {
        self.channel.push_error(error.clone());
    }
}
