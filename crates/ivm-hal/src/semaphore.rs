//! Counting semaphores with a monotonic payload.

use std::task::Poll;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct Semaphore {
    value: Mutex<u32>,
}

ivm_runtime::ref_object!(Semaphore, "hal.semaphore");

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    pub fn query(&self) -> u32 {
        *self.value.lock()
    }

    /// Raises the payload to `value`. Never lowers it.
    pub fn signal(&self, value: u32) {
        let mut current = self.value.lock();
        *current = (*current).max(value);
    }

    /// Ready once the payload reaches `value`.
    pub fn poll_wait(&self, value: u32) -> Poll<()> {
        if self.query() >= value {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
