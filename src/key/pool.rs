//! # Key Buffer Pool
//!
//! Every operation encodes its key into a fixed-size byte buffer. Under
//! heavy concurrent use allocating those buffers per call adds up, so the
//! cluster client rents them from a `BufferPool` instead.
//!
//! ## Layout
//!
//! - **Thread-local slot**: each thread keeps at most one cached buffer per
//!   pool. Renting from it touches no shared state.
//! - **Shared store**: a bounded stack of buffers behind a short-lived lock.
//! - **Overflow**: when both are empty a fresh buffer is allocated; when the
//!   shared store is full a released buffer is simply dropped. The pool never
//!   blocks and never fails.
//!
//! ## Ownership rules
//!
//! A rental is represented by a [`PooledBuffer`] guard. The guard is the only
//! handle to its buffer and returns it to the pool exactly once, on drop,
//! using the same `skip_local_slot` flag it was rented with.
//!
//! Callers must pass `skip_local_slot = true` when the rental:
//! - lives across an `.await` (the releasing thread may differ from the
//!   renting one), or
//! - is one of several buffers alive at once on the same thread (batched
//!   key encoding); only the first of them may use the local slot.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Capacity of the process-wide pools handed out by [`BufferPool::shared`].
pub const DEFAULT_SHARED_CAPACITY: usize = 128;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide pools keyed by codec type and key width.
static SHARED_POOLS: Lazy<Mutex<HashMap<(TypeId, usize), Arc<BufferPool>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A buffer cached on one thread, tagged with the pool that owns it.
struct LocalSlot {
    pool_id: u64,
    owner: Weak<()>,
    buffer: Box<[u8]>,
}

thread_local! {
    // One entry per live pool that currently has a cached buffer on this thread.
    static LOCAL_SLOTS: RefCell<Vec<LocalSlot>> = RefCell::new(Vec::new());
}

/// Forget slots whose pool has been dropped, possibly on another thread.
fn prune_dead(slots: &mut Vec<LocalSlot>) {
    slots.retain(|slot| slot.owner.strong_count() > 0);
}

fn take_local(pool_id: u64) -> Option<Box<[u8]>> {
    LOCAL_SLOTS
        .try_with(|slots| {
            let mut slots = slots.borrow_mut();
            prune_dead(&mut slots);
            let index = slots.iter().position(|slot| slot.pool_id == pool_id)?;
            Some(slots.swap_remove(index).buffer)
        })
        .ok()
        .flatten()
}

/// Hands the buffer back if the slot is already occupied or the thread is
/// shutting down.
fn put_local(pool_id: u64, owner: &Arc<()>, buffer: Box<[u8]>) -> Option<Box<[u8]>> {
    let mut buffer = Some(buffer);
    let _ = LOCAL_SLOTS.try_with(|slots| {
        let mut slots = slots.borrow_mut();
        prune_dead(&mut slots);
        if !slots.iter().any(|slot| slot.pool_id == pool_id) {
            if let Some(buffer) = buffer.take() {
                slots.push(LocalSlot {
                    pool_id,
                    owner: Arc::downgrade(owner),
                    buffer,
                });
            }
        }
    });
    buffer
}

/// Bounded pool of fixed-size byte buffers.
pub struct BufferPool {
    id: u64,
    // Local slots hold a weak handle; they are pruned once this is dropped.
    alive: Arc<()>,
    buffer_len: usize,
    capacity: usize,
    enabled: bool,
    store: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    /// Create a private pool holding up to `capacity` buffers of `buffer_len` bytes.
    pub fn new(buffer_len: usize, capacity: usize) -> Self {
        debug_assert!(buffer_len > 0, "pooled buffers must not be empty");
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            buffer_len,
            capacity,
            enabled: true,
            store: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// A pool that allocates on every rental and drops on every release.
    pub fn disabled(buffer_len: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            buffer_len,
            capacity: 0,
            enabled: false,
            store: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide pool for codec `codec` producing `buffer_len`-byte keys.
    ///
    /// Cluster clients built with default pool settings share this pool.
    pub fn shared(codec: TypeId, buffer_len: usize) -> Arc<Self> {
        let mut pools = SHARED_POOLS.lock();
        pools
            .entry((codec, buffer_len))
            .or_insert_with(|| Arc::new(Self::new(buffer_len, DEFAULT_SHARED_CAPACITY)))
            .clone()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Buffers currently parked in the shared store.
    pub fn available(&self) -> usize {
        self.store.lock().len()
    }

    /// Rent a buffer of exactly `buffer_len()` bytes.
    ///
    /// The contents are unspecified; callers overwrite the whole buffer.
    pub fn rent(&self, skip_local_slot: bool) -> PooledBuffer<'_> {
        PooledBuffer {
            pool: self,
            buffer: Some(self.take(skip_local_slot)),
            skip_local_slot,
        }
    }

    fn take(&self, skip_local_slot: bool) -> Box<[u8]> {
        if self.enabled {
            if !skip_local_slot {
                if let Some(buffer) = take_local(self.id) {
                    return buffer;
                }
            }
            if let Some(buffer) = self.store.lock().pop() {
                return buffer;
            }
        }
        vec![0u8; self.buffer_len].into_boxed_slice()
    }

    fn release(&self, buffer: Box<[u8]>, skip_local_slot: bool) {
        if !self.enabled || buffer.len() != self.buffer_len {
            return;
        }
        let buffer = if skip_local_slot {
            buffer
        } else {
            match put_local(self.id, &self.alive, buffer) {
                Some(buffer) => buffer,
                None => return,
            }
        };
        let mut store = self.store.lock();
        if store.len() < self.capacity {
            store.push(buffer);
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Slots cached on other threads are pruned the next time those
        // threads use any pool, or freed when they exit.
        let _ = take_local(self.id);
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_len", &self.buffer_len)
            .field("capacity", &self.capacity)
            .field("enabled", &self.enabled)
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive rental of one pooled buffer; released on drop.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Box<[u8]>>,
    skip_local_slot: bool,
}

impl PooledBuffer<'_> {
    pub fn skips_local_slot(&self) -> bool {
        self.skip_local_slot
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer, self.skip_local_slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::mpsc;

    #[test]
    fn test_rent_returns_exact_length() {
        let pool = BufferPool::new(8, 4);
        let a = pool.rent(false);
        let b = pool.rent(true);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
    }

    #[test]
    fn test_local_slot_reuses_buffer_on_same_thread() {
        let pool = BufferPool::new(8, 4);
        let first = pool.rent(false);
        let ptr = first.as_ptr();
        drop(first);

        // Parked in the local slot, not the shared store.
        assert_eq!(pool.available(), 0);
        let again = pool.rent(false);
        assert_eq!(again.as_ptr(), ptr);
    }

    #[test]
    fn test_skip_local_slot_goes_through_shared_store() {
        let pool = BufferPool::new(8, 4);
        let rented = pool.rent(true);
        let ptr = rented.as_ptr();
        drop(rented);
        assert_eq!(pool.available(), 1);

        let again = pool.rent(true);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_concurrent_rentals_on_one_thread_are_distinct() {
        let pool = BufferPool::new(4, 4);
        drop(pool.rent(false));

        // First buffer may use the slot, the rest must skip it.
        let buffers: Vec<_> = (0..6).map(|i| pool.rent(i > 0)).collect();
        let ptrs: HashSet<_> = buffers.iter().map(|b| b.as_ptr()).collect();
        assert_eq!(ptrs.len(), 6);
    }

    #[test]
    fn test_capacity_overflow_allocates_and_drops() {
        let pool = BufferPool::new(4, 2);
        let buffers: Vec<_> = (0..5).map(|_| pool.rent(true)).collect();
        assert!(buffers.iter().all(|b| b.len() == 4));
        drop(buffers);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_disabled_pool_never_retains() {
        let pool = BufferPool::disabled(4);
        assert!(!pool.is_enabled());
        drop(pool.rent(false));
        drop(pool.rent(true));
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.rent(false).len(), 4);
    }

    #[test]
    fn test_shared_pool_is_keyed_by_codec_and_width() {
        struct CodecA;
        struct CodecB;
        let a1 = BufferPool::shared(TypeId::of::<CodecA>(), 8);
        let a2 = BufferPool::shared(TypeId::of::<CodecA>(), 8);
        let a3 = BufferPool::shared(TypeId::of::<CodecA>(), 16);
        let b = BufferPool::shared(TypeId::of::<CodecB>(), 8);

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &a3));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(a1.capacity(), DEFAULT_SHARED_CAPACITY);
    }

    #[test]
    fn test_random_rent_release_never_aliases_live_buffers() {
        let pool = BufferPool::new(8, 3);
        let mut rng = rand::thread_rng();
        let mut live: Vec<PooledBuffer<'_>> = Vec::new();

        for _ in 0..2_000 {
            if live.is_empty() || rng.gen_bool(0.55) {
                // Only one rental at a time may use the local slot.
                let skip = live.iter().any(|b| !b.skips_local_slot()) || rng.gen_bool(0.5);
                live.push(pool.rent(skip));
            } else {
                let index = rng.gen_range(0..live.len());
                live.swap_remove(index);
            }

            let ptrs: HashSet<_> = live.iter().map(|b| b.as_ptr()).collect();
            assert_eq!(ptrs.len(), live.len());
        }
    }

    #[test]
    fn test_rentals_across_threads_keep_their_contents() {
        let pool = Arc::new(BufferPool::new(16, 8));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let mut buffer = pool.rent(i % 2 == 0);
                        buffer.fill(t);
                        std::thread::yield_now();
                        assert!(buffer.iter().all(|b| *b == t));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.available() <= pool.capacity());
    }

    #[test]
    fn test_dropped_pools_do_not_leave_local_slots_behind() {
        let (pools_tx, pools_rx) = mpsc::channel::<Arc<BufferPool>>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            for pool in pools_rx {
                drop(pool.rent(false));
                drop(pool);
                done_tx.send(()).unwrap();
            }
            LOCAL_SLOTS.with(|slots| slots.borrow().len())
        });

        for _ in 0..1_000 {
            let pool = Arc::new(BufferPool::new(8, 2));
            pools_tx.send(Arc::clone(&pool)).unwrap();
            done_rx.recv().unwrap();
            // Dropped here, on a different thread from the cached slot.
            drop(pool);
        }
        drop(pools_tx);

        let slots = worker.join().unwrap();
        assert!(slots <= 1, "local slots kept for dropped pools: {}", slots);
    }
}
