use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Pool of byte buffers reused across frames to avoid per-frame allocation.
///
/// Buffers are handed out as [`PooledBuffer`]s which return their storage to
/// the pool when dropped. Dropping the last `BufferPool` handle frees every
/// idle buffer; buffers still in flight are then freed on drop instead of
/// being returned.
///
/// # Performance
/// - Reuses storage via take()/drop cycle
/// - Falls back to allocation if pool is exhausted
/// - Keeps at most `capacity` idle buffers (prevents unbounded growth)
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    idle: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    allocations: AtomicU64,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                allocations: AtomicU64::new(0),
            }),
        }
    }

    /// Take a buffer of exactly `len` bytes, reusing idle storage when possible.
    ///
    /// Contents of a reused buffer are unspecified; callers overwrite it.
    pub fn take(&self, len: usize) -> PooledBuffer {
        let reused = self
            .shared
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop_front());

        let data = match reused {
            Some(mut buf) => {
                if buf.capacity() < len {
                    self.shared.allocations.fetch_add(1, Ordering::Relaxed);
                }
                buf.resize(len, 0);
                buf
            }
            None => {
                self.shared.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; len]
            }
        };

        PooledBuffer {
            data,
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Number of times fresh storage had to be allocated.
    pub fn allocations(&self) -> u64 {
        self.shared.allocations.load(Ordering::Relaxed)
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// Byte buffer borrowed from a [`BufferPool`].
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PoolShared>,
}

impl PooledBuffer {
    /// Wrap a plain vector that belongs to no pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            data,
            pool: Weak::new(),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if let Ok(mut idle) = pool.idle.lock()
            && idle.len() < pool.capacity
        {
            idle.push_back(std::mem::take(&mut self.data));
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}
