//! Generic resource pooling.
//!
//! A [`Pool`] hands out items (buffers, connections) with create-on-miss,
//! reset-on-acquire and return-on-release semantics. Items are checked out
//! through a [`Pooled`] guard; dropping the guard returns the item to the
//! free list, so every exit path of a request releases what it acquired.
//!
//! # Capacity
//!
//! - [`Capacity::Unbounded`]: `acquire` never blocks, a new item is built on
//!   every miss. Used for buffers.
//! - [`Capacity::Bounded`]: at most `max` items exist at once. When all of them
//!   are checked out, `acquire` waits for a release up to `wait` and then fails
//!   with [`PoolError::Exhausted`]. Used for connections.
//!
//! A factory failure reaches the caller of `acquire` unchanged, in the pool's
//! error type `E`; exhaustion is converted into it through `From<PoolError>`.
//!
//! The free list is the only shared mutable state and is guarded by a single
//! mutex per pool. No user code (factory, reset hook, item drop) runs while the
//! lock is held.
pub mod buffer;

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::trace;
use thiserror::Error;

pub use buffer::{GROWTH_THRESHOLD, MIN_CAPACITY, PooledBuffer, buffer_pool, calculate_capacity};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool exhausted: {max} items checked out after waiting {wait:?}")]
    Exhausted { max: usize, wait: Duration },
}

/// Growth limit of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded { max: usize, wait: Duration },
}

type Factory<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct State<T> {
    free: Vec<T>,
    outstanding: usize,
}

pub struct Pool<T, E = PoolError> {
    state: Mutex<State<T>>,
    released: Condvar,
    capacity: Capacity,
    factory: Factory<T, E>,
    reset: Reset<T>,
}

impl<T, E: From<PoolError>> Pool<T, E> {
    /// Creates an empty pool. Items are built lazily by `factory` and passed
    /// through `reset` every time they are handed out.
    pub fn new<F, R>(capacity: Capacity, factory: F, reset: R) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        if let Capacity::Bounded { max, .. } = capacity {
            assert!(max > 0, "bounded pool needs room for at least one item");
        }

        Self {
            state: Mutex::new(State {
                free: Vec::new(),
                outstanding: 0,
            }),
            released: Condvar::new(),
            capacity,
            factory: Box::new(factory),
            reset: Box::new(reset),
        }
    }

    /// Checks an item out of the pool, building a new one when the free list
    /// is empty and the capacity allows it.
    pub fn acquire(&self) -> Result<Pooled<'_, T, E>, E> {
        let mut state = self.lock();
        let deadline = match self.capacity {
            Capacity::Bounded { wait, .. } => Some(Instant::now() + wait),
            Capacity::Unbounded => None,
        };

        loop {
            if let Some(mut item) = state.free.pop() {
                state.outstanding += 1;
                drop(state);
                (self.reset)(&mut item);
                return Ok(Pooled::new(self, item));
            }

            match (self.capacity, deadline) {
                (Capacity::Bounded { max, wait }, Some(deadline)) if state.outstanding >= max => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PoolError::Exhausted { max, wait }.into());
                    }
                    trace!("pool at capacity ({max}), waiting for a release");
                    state = self
                        .released
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
                _ => break,
            }
        }

        // Reserve the slot before building so concurrent callers respect the bound.
        state.outstanding += 1;
        drop(state);

        match (self.factory)() {
            Ok(mut item) => {
                (self.reset)(&mut item);
                Ok(Pooled::new(self, item))
            }
            Err(e) => {
                self.forget_one();
                Err(e)
            }
        }
    }

    /// Removes and returns every idle item. Checked-out items are unaffected
    /// and still return to the pool when their guard drops.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut self.lock().free)
    }

    /// Number of items sitting in the free list.
    pub fn idle(&self) -> usize {
        self.lock().free.len()
    }

    /// Number of items currently checked out.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }
}

impl<T, E> Pool<T, E> {
    fn release(&self, item: T) {
        let mut state = self.lock();
        state.outstanding -= 1;
        state.free.push(item);
        drop(state);
        self.released.notify_one();
    }

    fn forget_one(&self) {
        self.lock().outstanding -= 1;
        self.released.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The free list is never left half-updated, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> fmt::Debug for Pool<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("idle", &state.free.len())
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

/// An item checked out of a [`Pool`]. Returned to the pool on drop.
pub struct Pooled<'a, T, E = PoolError> {
    pool: &'a Pool<T, E>,
    item: Option<T>,
}

impl<'a, T, E> Pooled<'a, T, E> {
    fn new(pool: &'a Pool<T, E>, item: T) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    /// Destroys the item instead of returning it, freeing its slot.
    pub fn discard(mut self) {
        let item = self.item.take();
        self.pool.forget_one();
        drop(item);
    }
}

impl<T, E> Deref for Pooled<'_, T, E> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item is present until drop")
    }
}

impl<T, E> DerefMut for Pooled<'_, T, E> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item is present until drop")
    }
}

impl<T, E> Drop for Pooled<'_, T, E> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Pooled<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    fn counting_pool(capacity: Capacity) -> (Pool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = Pool::new(
            capacity,
            move || Ok(counter.fetch_add(1, Ordering::SeqCst)),
            |_| {},
        );
        (pool, created)
    }

    #[test]
    fn acquire_creates_on_miss() {
        let (pool, created) = counting_pool(Capacity::Unbounded);

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        assert_ne!(*first, *second);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn release_makes_item_reusable() {
        let (pool, created) = counting_pool(Capacity::Unbounded);

        let id = *pool.acquire().unwrap();
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire().unwrap();
        assert_eq!(*again, id);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn acquire_resets_item() {
        let pool: Pool<Vec<u8>> = Pool::new(Capacity::Unbounded, || Ok(Vec::new()), Vec::clear);

        pool.acquire().unwrap().extend_from_slice(b"dirty");
        assert!(pool.acquire().unwrap().is_empty());
    }

    #[test]
    fn discard_frees_bounded_slot() {
        let (pool, created) = counting_pool(Capacity::Bounded {
            max: 1,
            wait: Duration::from_millis(10),
        });

        pool.acquire().unwrap().discard();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 0);

        let _item = pool.acquire().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bounded_pool_reports_exhaustion() {
        let (pool, _) = counting_pool(Capacity::Bounded {
            max: 1,
            wait: Duration::from_millis(20),
        });

        let _held = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(PoolError::Exhausted { max: 1, .. })
        ));
    }

    #[test]
    fn bounded_pool_waits_for_release() {
        let (pool, created) = counting_pool(Capacity::Bounded {
            max: 1,
            wait: Duration::from_secs(5),
        });
        let pool = Arc::new(pool);

        let held = pool.acquire().unwrap();
        let id = *held;
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || *pool.acquire().unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap(), id);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    enum DialError {
        Refused(&'static str),
        Pool(PoolError),
    }

    impl From<PoolError> for DialError {
        fn from(value: PoolError) -> Self {
            DialError::Pool(value)
        }
    }

    #[test]
    fn factory_failure_frees_slot() {
        let pool: Pool<u8, DialError> = Pool::new(
            Capacity::Bounded {
                max: 1,
                wait: Duration::from_millis(10),
            },
            || Err(DialError::Refused("version 99")),
            |_| {},
        );

        assert!(matches!(pool.acquire(), Err(DialError::Refused("version 99"))));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn exhaustion_converts_into_pool_error_type() {
        let pool: Pool<u8, DialError> = Pool::new(
            Capacity::Bounded {
                max: 1,
                wait: Duration::from_millis(10),
            },
            || Ok(7),
            |_| {},
        );

        let _held = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(DialError::Pool(PoolError::Exhausted { max: 1, .. }))
        ));
    }

    #[test]
    fn drain_empties_free_list() {
        let (pool, _) = counting_pool(Capacity::Unbounded);
        drop((pool.acquire().unwrap(), pool.acquire().unwrap()));

        assert_eq!(pool.drain().len(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn concurrent_acquire_is_exclusive() {
        const THREADS: usize = 8;
        let (pool, _) = counting_pool(Capacity::Unbounded);
        let pool = Arc::new(pool);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let item = pool.acquire().unwrap();
                    let id = *item;
                    // Everyone holds their item at the same time.
                    barrier.wait();
                    id
                })
            })
            .collect::<Vec<_>>();

        let ids = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), THREADS);
        assert_eq!(pool.outstanding(), 0);
    }
}
