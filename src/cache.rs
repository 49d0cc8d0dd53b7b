//! The cache itself: residency, locking, eviction, and the background
//! daemons that keep it flushed and warm.

use crate::config::CacheConfig;
use crate::daemons::{FlushDaemon, ReadAheadDaemon};
use crate::device::{BlockDevice, INVALID_SECTOR, SECTOR_SIZE};
use crate::error::CacheError;
use crate::slot::{LockMode, Slot, SlotFlags};
use crossbeam_utils::CachePadded;
use std::sync::{Mutex, MutexGuard};

/// State protected by the cache-wide lock: the residency scan and the
/// clock hand used by eviction. Nothing about an individual slot's
/// contents lives here — that's the slot's own `block_lock`.
struct ClockState {
    hand: usize,
}

/// A fixed-capacity, shared buffer cache over a [`BlockDevice`].
///
/// Construct with [`Cache::new`]; tear down with [`Cache::shutdown`]. There
/// is no implicit global instance, so a process may run several caches
/// side by side (as the test suite does).
pub struct Cache<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) slots: Vec<CachePadded<Slot>>,
    cache_lock: Mutex<ClockState>,
    pub(crate) config: CacheConfig,
    flush_daemon: Mutex<Option<FlushDaemon>>,
    read_ahead_daemon: Mutex<Option<ReadAheadDaemon>>,
}

impl<D: BlockDevice + 'static> Cache<D> {
    /// Builds a cache over `device` and starts its background daemons.
    pub fn new(device: D, config: CacheConfig) -> std::sync::Arc<Self> {
        let slots = (0..config.capacity)
            .map(|_| CachePadded::new(Slot::new()))
            .collect();
        let cache = std::sync::Arc::new(Self {
            device,
            slots,
            cache_lock: Mutex::new(ClockState { hand: 0 }),
            config,
            flush_daemon: Mutex::new(None),
            read_ahead_daemon: Mutex::new(None),
        });
        *cache.flush_daemon.lock().unwrap() = Some(FlushDaemon::start(cache.clone()));
        *cache.read_ahead_daemon.lock().unwrap() = Some(ReadAheadDaemon::start(cache.clone()));
        cache
    }

    /// Stops both background daemons and flushes all dirty slots.
    pub fn shutdown(&self) -> Result<(), CacheError<D::Error>> {
        if let Some(d) = self.flush_daemon.lock().unwrap().take() {
            d.stop();
        }
        if let Some(d) = self.read_ahead_daemon.lock().unwrap().take() {
            d.stop();
        }
        self.flush()
    }

    /// Locks `sector` into the cache and returns a handle to it.
    ///
    /// With [`LockMode::Shared`] the returned handle may coexist with other
    /// shared handles on the same sector. With [`LockMode::Exclusive`] the
    /// caller is the sole holder. Blocks (and, if every slot is busy,
    /// retries after [`CacheConfig::eviction_backoff`]) until it can
    /// proceed.
    pub fn lock(&self, sector: u32, mode: LockMode) -> SlotHandle<'_, D> {
        debug_assert_ne!(sector, INVALID_SECTOR, "sector is reserved");
        loop {
            let mut clock = self.cache_lock.lock().unwrap();

            // Hit: the sector is already resident.
            for slot in &self.slots {
                let mut state = slot.state.lock().unwrap();
                if state.sector != Some(sector) {
                    continue;
                }
                drop(clock);

                match mode {
                    LockMode::Shared => {
                        state.read_waiters += 1;
                        if state.writers > 0 || state.write_waiters > 0 {
                            loop {
                                state = slot.no_writers.wait(state).unwrap();
                                if state.writers == 0 {
                                    break;
                                }
                            }
                        }
                        state.readers += 1;
                        state.read_waiters -= 1;
                    }
                    LockMode::Exclusive => {
                        state.write_waiters += 1;
                        if state.readers > 0 || state.read_waiters > 0 || state.writers > 0 {
                            loop {
                                state = slot.no_readers_or_writers.wait(state).unwrap();
                                if state.readers == 0 && state.writers == 0 {
                                    break;
                                }
                            }
                        }
                        state.writers += 1;
                        state.write_waiters -= 1;
                    }
                }
                debug_assert_eq!(state.sector, Some(sector));
                drop(state);
                return SlotHandle {
                    cache: self,
                    slot,
                    mode,
                    done: false,
                };
            }

            // Miss: claim a free slot, still holding `clock`.
            for slot in &self.slots {
                let mut state = slot.state.lock().unwrap();
                if !state.is_free() {
                    continue;
                }
                state.sector = Some(sector);
                state.flags = SlotFlags::empty();
                debug_assert_eq!(state.readers, 0);
                debug_assert_eq!(state.writers, 0);
                match mode {
                    LockMode::Shared => state.readers = 1,
                    LockMode::Exclusive => state.writers = 1,
                }
                drop(state);
                drop(clock);
                return SlotHandle {
                    cache: self,
                    slot,
                    mode,
                    done: false,
                };
            }

            // No free slots: run a second-chance sweep. This consumes
            // `clock`: the sweep releases the cache-wide lock itself the
            // moment it has either claimed a candidate or exhausted the
            // table, so eviction I/O never runs with the cache lock held.
            if self.sweep_and_evict(clock) {
                continue;
            }

            std::thread::sleep(self.config.eviction_backoff);
        }
    }

    /// One pass of the clock hand, evicting the first unreferenced slot it
    /// finds. Returns `true` if a slot was freed (so the caller should
    /// retry its own allocation attempt), `false` if the whole table was
    /// swept without finding a victim. Always releases `clock` before
    /// returning.
    fn sweep_and_evict(&self, mut clock: MutexGuard<'_, ClockState>) -> bool {
        for _ in 0..self.slots.len() {
            let idx = clock.hand;
            clock.hand = (clock.hand + 1) % self.slots.len();
            let slot = &self.slots[idx];

            let mut state = slot.state.lock().unwrap();
            if state.is_referenced() {
                continue;
            }
            state.writers = 1;
            let sector = state.sector;
            drop(state);
            drop(clock);

            // Nothing else can touch this slot's data while writers == 1
            // and no one else is waiting yet, so it's safe to write back
            // without holding the cache lock across the disk I/O.
            let write_back_result = {
                let state = slot.state.lock().unwrap();
                if state.flags.contains(SlotFlags::UP_TO_DATE | SlotFlags::DIRTY) {
                    drop(state);
                    // SAFETY: we hold the sole writer reservation.
                    let data = unsafe { slot.data() };
                    Some(self.device.write_sector(sector.unwrap(), data))
                } else {
                    None
                }
            };
            let write_failed = match write_back_result {
                Some(Err(e)) => {
                    log::error!(
                        "eviction write-back of sector {:?} failed, leaving it resident: {}",
                        sector,
                        e
                    );
                    true
                }
                Some(Ok(())) => {
                    let mut state = slot.state.lock().unwrap();
                    state.flags.remove(SlotFlags::DIRTY);
                    false
                }
                None => false,
            };

            let mut state = slot.state.lock().unwrap();
            state.writers = 0;
            if write_failed {
                // Keep the sector resident so the write can be retried
                // later instead of discarding the only copy of the data.
                // `clock` was already released above, so we can't keep
                // scanning here — report no victim found this pass and
                // let `Cache::lock`'s retry loop reacquire `cache_lock`
                // and rescan from scratch, same as pintos's `goto
                // try_again`.
                if state.read_waiters > 0 {
                    slot.no_writers.notify_all();
                } else if state.write_waiters > 0 {
                    slot.no_readers_or_writers.notify_one();
                }
                return false;
            }
            if state.read_waiters == 0 && state.write_waiters == 0 {
                state.sector = None;
                state.flags = SlotFlags::empty();
            } else if state.read_waiters > 0 {
                slot.no_writers.notify_all();
            } else {
                slot.no_readers_or_writers.notify_one();
            }
            return true;
        }
        false
    }

    /// Invalidates `sector` without writing it back, if present and
    /// currently unused by anyone.
    pub fn drop_sector(&self, sector: u32) {
        let _clock = self.cache_lock.lock().unwrap();
        for slot in &self.slots {
            let mut state = slot.state.lock().unwrap();
            if state.sector != Some(sector) {
                continue;
            }
            if !state.is_referenced() {
                state.sector = None;
                state.flags = SlotFlags::empty();
            }
            return;
        }
    }

    /// Enqueues `sector` for background, best-effort read-ahead.
    pub fn submit_read_ahead(&self, sector: u32) {
        debug_assert_ne!(sector, INVALID_SECTOR, "sector is reserved");
        if let Some(daemon) = self.read_ahead_daemon.lock().unwrap().as_ref() {
            daemon.submit(sector, self.config.capacity);
        }
    }

    /// Writes back every dirty, up-to-date slot.
    pub fn flush(&self) -> Result<(), CacheError<D::Error>> {
        for slot in &self.slots {
            let sector = {
                let state = slot.state.lock().unwrap();
                match state.sector {
                    Some(s) => s,
                    None => continue,
                }
            };
            let handle = self.lock(sector, LockMode::Exclusive);
            let write_result = {
                let mut state = handle.slot.state.lock().unwrap();
                if state.flags.contains(SlotFlags::UP_TO_DATE | SlotFlags::DIRTY) {
                    // SAFETY: `handle` holds the exclusive reservation.
                    let data = unsafe { handle.slot.data() };
                    let result = self.device.write_sector(sector, data);
                    drop(state);
                    if result.is_ok() {
                        state = handle.slot.state.lock().unwrap();
                        state.flags.remove(SlotFlags::DIRTY);
                    }
                    Some(result)
                } else {
                    None
                }
            };
            handle.unlock();
            if let Some(Err(e)) = write_result {
                return Err(CacheError::Device(e));
            }
        }
        Ok(())
    }
}

/// A held reservation on a cache slot, in the mode it was acquired with.
///
/// Must be released with [`SlotHandle::unlock`]; dropping it unreleased is
/// a programming error and panics, mirroring an explicit-unlock guard
/// rather than silently releasing on scope exit.
#[must_use = "a SlotHandle must be released with .unlock()"]
pub struct SlotHandle<'a, D: BlockDevice> {
    cache: &'a Cache<D>,
    pub(crate) slot: &'a Slot,
    mode: LockMode,
    done: bool,
}

impl<'a, D: BlockDevice> SlotHandle<'a, D> {
    /// Brings the slot up to date (loading from disk on first access) and
    /// returns a reference to its contents.
    pub fn read(&self) -> Result<&[u8; SECTOR_SIZE], CacheError<D::Error>> {
        let _guard = self.slot.data_lock.lock().unwrap();
        let needs_load = {
            let state = self.slot.state.lock().unwrap();
            !state.flags.contains(SlotFlags::UP_TO_DATE)
        };
        if needs_load {
            let sector = self.slot.state.lock().unwrap().sector.unwrap();
            // SAFETY: `data_lock` serializes this against any other
            // demand load of the same slot, and no writer can be holding
            // `data_mut` concurrently: a fresh slot's only writer is
            // whoever allocated it, which is us.
            let buf = unsafe { self.slot.data_mut() };
            self.cache
                .device
                .read_sector(sector, buf)
                .map_err(CacheError::Device)?;
            let mut state = self.slot.state.lock().unwrap();
            state.flags.insert(SlotFlags::UP_TO_DATE);
            state.flags.remove(SlotFlags::DIRTY);
        }
        // SAFETY: the slot is up to date and we hold a live reservation.
        Ok(unsafe { self.slot.data() })
    }

    /// Zeroes the slot's contents without reading from disk. Requires
    /// [`LockMode::Exclusive`].
    pub fn zero(&self) -> &mut [u8; SECTOR_SIZE] {
        assert_eq!(
            self.mode,
            LockMode::Exclusive,
            "zero() requires an exclusive lock"
        );
        // SAFETY: exclusive mode guarantees we are the sole writer.
        let data = unsafe { self.slot.data_mut() };
        data.fill(0);
        let mut state = self.slot.state.lock().unwrap();
        state.flags.insert(SlotFlags::UP_TO_DATE | SlotFlags::DIRTY);
        drop(state);
        // SAFETY: see above.
        unsafe { self.slot.data_mut() }
    }

    /// Marks the slot dirty so it is written back before eviction or on
    /// the next flush. The slot must already be up to date.
    pub fn mark_dirty(&self) {
        let mut state = self.slot.state.lock().unwrap();
        assert!(
            state.flags.contains(SlotFlags::UP_TO_DATE),
            "mark_dirty() requires an up-to-date slot"
        );
        state.flags.insert(SlotFlags::DIRTY);
    }

    /// Releases the reservation. Required before the handle is dropped.
    pub fn unlock(mut self) {
        self.release();
        self.done = true;
    }

    fn release(&mut self) {
        let mut state = self.slot.state.lock().unwrap();
        match self.mode {
            LockMode::Shared => {
                debug_assert_eq!(state.writers, 0);
                state.readers -= 1;
                if state.readers == 0 {
                    self.slot.no_readers_or_writers.notify_one();
                }
            }
            LockMode::Exclusive => {
                debug_assert_eq!(state.readers, 0);
                debug_assert_eq!(state.writers, 1);
                state.writers -= 1;
                if state.read_waiters > 0 {
                    self.slot.no_writers.notify_all();
                } else {
                    self.slot.no_readers_or_writers.notify_one();
                }
            }
        }
    }
}

impl<'a, D: BlockDevice> Drop for SlotHandle<'a, D> {
    fn drop(&mut self) {
        // Don't panic a second time while already unwinding from some
        // other panic (e.g. a precondition assert in `zero()`): that
        // would abort the process instead of letting the original panic
        // propagate normally.
        if !self.done && !std::thread::panicking() {
            panic!(".unlock() must be explicitly called on a SlotHandle before it is dropped");
        }
    }
}
