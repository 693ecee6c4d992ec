//! Common structs and functions used by various (rust code) modules.

use mio::Waker;
use std::{sync::Arc, thread::JoinHandle};

#[derive(Debug)]
pub struct ThreadHandle {
    name: &'static str,
    join_t: JoinHandle<()>,
    waker_t: Arc<Waker>,
}
impl ThreadHandle {
    /// Construct a new thread.
    pub fn new(name: &'static str, join_t: JoinHandle<()>, waker_t: Arc<Waker>) -> Self {
        Self {
            name,
            join_t,
            waker_t,
        }
    }

    /// Stop the thread and cleanup.
    pub fn join_now(self) {
        if let Err(e) = self.waker_t.wake() {
            tracing::error!("error while notifying {} to stop: {}", self.name, e);
        }

        let _ = self.join_t.join();
    }
}
