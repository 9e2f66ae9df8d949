//! Owner threads: the only threads allowed to mutate their cells.

use std::cell::Cell;
use std::io;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;

use super::host::OwnerKey;

/// Unit of work queued to an owner.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_OWNER: Cell<Option<(u64, OwnerKey)>> = const { Cell::new(None) };
}

/// Scheduler id and key owned by the calling thread, if any.
pub(crate) fn current_owner() -> Option<(u64, OwnerKey)> {
    CURRENT_OWNER.with(Cell::get)
}

/// A dedicated thread draining a FIFO job queue.
pub(crate) struct OwnerThread {
    key: OwnerKey,
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl OwnerThread {
    pub(crate) fn spawn(scheduler_id: u64, key: OwnerKey) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let name = match key {
            OwnerKey::Global => format!("cellbatch-owner-{}", scheduler_id),
            OwnerKey::Region(region) => {
                format!("cellbatch-region-{}-{}_{}", scheduler_id, region.x, region.z)
            }
        };

        let handle = thread::Builder::new().name(name).spawn(move || {
            CURRENT_OWNER.with(|c| c.set(Some((scheduler_id, key))));
            // Jobs arrive already guarded; a closed channel still yields
            // everything queued before the close.
            while let Some(job) = rx.blocking_recv() {
                job();
            }
            CURRENT_OWNER.with(|c| c.set(None));
        })?;

        Ok(Self { key, tx, handle })
    }

    pub(crate) fn key(&self) -> OwnerKey {
        self.key
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Queue a job; hands it back if the thread has exited.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }

    /// Close the queue, let the thread finish what is queued, and join it
    /// unless called from the thread itself.
    pub(crate) fn shutdown(self) {
        let OwnerThread { key, tx, handle } = self;
        drop(tx);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Owner thread for {} exited with a panic", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_jobs_run_in_order_on_owner() {
        let owner = OwnerThread::spawn(7, OwnerKey::Global).unwrap();
        let (tx, rx) = std_mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            owner
                .submit(Box::new(move || {
                    tx.send((i, thread::current().id(), current_owner())).unwrap();
                }))
                .ok()
                .unwrap();
        }
        let thread_id = owner.thread_id();
        owner.shutdown();

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen.len(), 10);
        for (expected, (i, tid, current)) in seen.into_iter().enumerate() {
            assert_eq!(i, expected);
            assert_eq!(tid, thread_id);
            assert_eq!(current, Some((7, OwnerKey::Global)));
        }
    }

    #[test]
    fn test_caller_is_not_owner() {
        assert_eq!(current_owner(), None);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let owner = OwnerThread::spawn(1, OwnerKey::Global).unwrap();
        let (tx, rx) = std_mpsc::channel();
        for _ in 0..100 {
            let tx = tx.clone();
            let _ = owner.submit(Box::new(move || {
                thread::sleep(std::time::Duration::from_micros(50));
                tx.send(()).unwrap();
            }));
        }
        owner.shutdown();
        assert_eq!(rx.try_iter().count(), 100);
    }
}
