//! Background threads: the flush daemon and the read-ahead daemon.
//!
//! Both are plain [`std::thread`] loops gated on a [`std::sync::Condvar`]
//! so that [`Cache::shutdown`](crate::cache::Cache::shutdown) can wake them
//! immediately instead of waiting out a full sleep interval or queue-empty
//! wait.

use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::slot::LockMode;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Periodically calls [`Cache::flush`].
pub(crate) struct FlushDaemon {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl FlushDaemon {
    pub(crate) fn start<D: BlockDevice + 'static>(cache: Arc<Cache<D>>) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = stop.clone();
        let handle = std::thread::Builder::new()
            .name("flushd".into())
            .spawn(move || {
                let (lock, cvar) = &*stop_for_thread;
                let mut stopped = lock.lock().unwrap();
                loop {
                    let (guard, timeout) = cvar
                        .wait_timeout_while(stopped, cache.config.flush_interval, |s| !*s)
                        .unwrap();
                    stopped = guard;
                    if *stopped {
                        return;
                    }
                    debug_assert!(timeout.timed_out());
                    if let Err(e) = cache.flush() {
                        log::error!("flush daemon: flush failed: {}", e);
                    }
                }
            })
            .expect("failed to spawn flush daemon thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub(crate) fn stop(mut self) {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct ReadAheadQueue {
    pending: VecDeque<u32>,
    stopped: bool,
}

/// Consumes a FIFO of sector numbers submitted via
/// [`Cache::submit_read_ahead`](crate::cache::Cache::submit_read_ahead) and
/// warms the cache with a shared-mode read of each.
pub(crate) struct ReadAheadDaemon {
    queue: Arc<(Mutex<ReadAheadQueue>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl ReadAheadDaemon {
    pub(crate) fn start<D: BlockDevice + 'static>(cache: Arc<Cache<D>>) -> Self {
        let queue = Arc::new((
            Mutex::new(ReadAheadQueue {
                pending: VecDeque::new(),
                stopped: false,
            }),
            Condvar::new(),
        ));
        let queue_for_thread = queue.clone();
        let handle = std::thread::Builder::new()
            .name("readaheadd".into())
            .spawn(move || {
                let (lock, cvar) = &*queue_for_thread;
                loop {
                    let mut state = lock.lock().unwrap();
                    while state.pending.is_empty() && !state.stopped {
                        state = cvar.wait(state).unwrap();
                    }
                    if state.pending.is_empty() && state.stopped {
                        return;
                    }
                    let sector = state.pending.pop_front().unwrap();
                    drop(state);

                    let handle = cache.lock(sector, LockMode::Shared);
                    if let Err(e) = handle.read() {
                        log::warn!("read-ahead daemon: read of sector {} failed: {}", sector, e);
                    }
                    handle.unlock();
                }
            })
            .expect("failed to spawn read-ahead daemon thread");
        Self {
            queue,
            handle: Some(handle),
        }
    }

    /// Best-effort enqueue. Silently dropped once the soft cap
    /// (`capacity_hint * 4`) is reached, preserving advisory semantics.
    pub(crate) fn submit(&self, sector: u32, capacity_hint: usize) {
        let (lock, cvar) = &*self.queue;
        let mut state = lock.lock().unwrap();
        if state.pending.len() >= capacity_hint * 4 {
            log::debug!("read-ahead queue full, dropping sector {}", sector);
            return;
        }
        state.pending.push_back(sector);
        cvar.notify_one();
    }

    pub(crate) fn stop(mut self) {
        {
            let (lock, cvar) = &*self.queue;
            lock.lock().unwrap().stopped = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
