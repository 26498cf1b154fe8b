//! Serialized per-peer task execution.
//!
//! Every peer gets its own worker task with an unbounded FIFO queue, so the tasks for one peer
//!  are processed strictly in submission order and never concurrently, while different peers'
//!  workers run in parallel on the runtime. The pool is the single registry of peers: workers
//!  are created on the first task for an unknown key and removed explicitly, or by themselves
//!  once they report being finished.

use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use crate::error::SrtError;

/// The state owned by a single peer's worker, processing that peer's tasks one at a time
#[async_trait]
pub trait PeerWorker: Send + 'static {
    type Task: Send + 'static;

    async fn on_task(&mut self, task: Self::Task) -> anyhow::Result<()>;

    /// A finished worker stops processing: remaining queued tasks are dropped and the worker
    ///  is removed from the pool.
    fn is_finished(&self) -> bool;

    /// Called once after the worker processed its last task, whether it finished by itself,
    ///  was removed from the pool or the pool was shut down.
    async fn on_stop(&mut self) {}
}

/// Lets a worker (or something it owns) submit tasks to its own queue. The handle does not
///  keep the worker alive.
pub struct PeerTaskHandle<T> {
    sender: mpsc::WeakUnboundedSender<T>,
}

impl<T> Clone for PeerTaskHandle<T> {
    fn clone(&self) -> Self {
        PeerTaskHandle { sender: self.sender.clone() }
    }
}

impl<T> PeerTaskHandle<T> {
    pub(crate) fn from_sender(sender: &mpsc::UnboundedSender<T>) -> PeerTaskHandle<T> {
        PeerTaskHandle { sender: sender.downgrade() }
    }

    /// returns `false` if the worker is gone
    pub fn submit(&self, task: T) -> bool {
        match self.sender.upgrade() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        }
    }
}

pub type WorkerFactory<K, W> = Arc<dyn Fn(&K, PeerTaskHandle<<W as PeerWorker>::Task>) -> W + Send + Sync>;

struct WorkerEntry<T> {
    id: u64,
    sender: mpsc::UnboundedSender<T>,
    join_handle: JoinHandle<()>,
}

type Workers<K, T> = Arc<Mutex<FxHashMap<K, WorkerEntry<T>>>>;

pub struct PeerTaskPool<K, W: PeerWorker> {
    max_workers: usize,
    workers: Workers<K, W::Task>,
    factory: WorkerFactory<K, W>,
    next_id: AtomicU64,
}

impl<K, W> PeerTaskPool<K, W>
where
    K: Clone + Debug + Eq + Hash + Send + Sync + 'static,
    W: PeerWorker,
{
    pub fn new(max_workers: usize, factory: WorkerFactory<K, W>) -> PeerTaskPool<K, W> {
        PeerTaskPool {
            max_workers,
            workers: Default::default(),
            factory,
            next_id: AtomicU64::new(0),
        }
    }

    /// Enqueues a task for a peer, creating the peer's worker if there is none. Fails if a new
    ///  worker would be needed but the pool is at capacity.
    pub async fn execute(&self, key: K, task: W::Task) -> Result<(), SrtError> {
        let mut workers = self.workers.lock().await;

        let task = match workers.get(&key) {
            Some(entry) => match entry.sender.send(task) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(task)) => {
                    debug!("worker for {:?} terminated - replacing it", key);
                    workers.remove(&key);
                    task
                }
            },
            None => task,
        };

        if workers.len() >= self.max_workers {
            return Err(SrtError::PoolExhausted(self.max_workers));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = PeerTaskHandle::from_sender(&sender);
        let worker = (self.factory)(&key, handle);

        debug!("starting worker #{} for {:?}", id, key);
        let join_handle = tokio::spawn(Self::run(key.clone(), id, worker, receiver, self.workers.clone()));

        // the worker can not finish before its first task, so this send succeeds
        let _ = sender.send(task);
        workers.insert(key, WorkerEntry { id, sender, join_handle });
        Ok(())
    }

    /// Enqueues a task only if the peer has a live worker, never creating one
    pub async fn execute_if_present(&self, key: &K, task: W::Task) -> bool {
        self.workers.lock().await
            .get(key)
            .map(|entry| entry.sender.send(task).is_ok())
            .unwrap_or(false)
    }

    async fn run(key: K, id: u64, mut worker: W, mut receiver: mpsc::UnboundedReceiver<W::Task>, workers: Workers<K, W::Task>) {
        while let Some(task) = receiver.recv().await {
            if let Err(e) = worker.on_task(task).await {
                warn!("task for {:?} failed: {}", key, e);
            }
            if worker.is_finished() {
                debug!("worker #{} for {:?} finished", id, key);
                break;
            }
        }

        receiver.close();
        worker.on_stop().await;

        // a replacement worker may already be registered under the same key
        let mut workers = workers.lock().await;
        if let Entry::Occupied(entry) = workers.entry(key) {
            if entry.get().id == id {
                entry.remove();
            }
        }
    }

    /// Removes a peer's worker, waiting for it to process the tasks already queued.
    pub async fn remove(&self, key: &K) -> bool {
        // NB: the lock must not be held while waiting, the worker acquires it when it terminates
        let Some(entry) = self.workers.lock().await.remove(key) else {
            return false;
        };
        let WorkerEntry { sender, join_handle, .. } = entry;
        drop(sender);
        if let Err(e) = join_handle.await {
            warn!("worker for {:?} panicked: {}", key, e);
        }
        true
    }

    pub async fn shutdown_all(&self) {
        let entries = self.workers.lock().await
            .drain()
            .collect::<Vec<_>>();
        for (key, WorkerEntry { sender, join_handle, .. }) in entries {
            drop(sender);
            if let Err(e) = join_handle.await {
                warn!("worker for {:?} panicked: {}", key, e);
            }
        }
    }

    pub async fn active_peers(&self) -> Vec<K> {
        self.workers.lock().await
            .keys()
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
