//! Size-classed buffer pool.
//!
//! The pool keeps one free list per configured size class, each behind its
//! own lock so unrelated classes never contend.  A class owns at most
//! `ceiling` pooled buffers; once that many exist and none is idle, checkouts
//! fall back to throwaway allocations that are freed on release instead of
//! blocking.  Every checked-out buffer carries a unique [`BufferId`] that the
//! class records until the buffer comes back, which is how double releases
//! and foreign buffers are detected.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{PoolConfig, SizeClassConfig};
use crate::error::{EngineError, Result};

/// Identifier stamped on every checkout; unique within one pool.
pub type BufferId = u64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Where a checked-out buffer's storage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferOrigin {
    /// Owned by a size class; returns to the idle list on release.
    Pooled,
    /// Allocated because the class was at its ceiling; freed on release.
    Fallback,
    /// Larger than every class; freed on release.
    Oversize,
}

/// Storage for `len` field elements checked out from a [`PoolManager`].
pub struct Buffer {
    id: BufferId,
    pool_id: u64,
    class: Option<usize>,
    origin: BufferOrigin,
    data: Vec<u64>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

impl Buffer {
    fn detached() -> Self {
        Buffer {
            id: 0,
            pool_id: 0,
            class: None,
            origin: BufferOrigin::Oversize,
            data: Vec::new(),
        }
    }

    /// Exclusive-ownership marker of this checkout.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Origin of the backing storage.
    pub fn origin(&self) -> BufferOrigin {
        self.origin
    }

    /// Number of usable elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated capacity in elements (the class capacity for class buffers).
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Read-only view of the elements.
    pub fn as_slice(&self) -> &[u64] {
        &self.data
    }

    /// Mutable view of the elements.
    pub fn as_mut_slice(&mut self) -> &mut [u64] {
        &mut self.data
    }
}

struct ClassState {
    capacity: usize,
    ceiling: usize,
    idle: Vec<Vec<u64>>,
    pooled_total: usize,
    checked_out: HashSet<BufferId>,
    fallback_outstanding: usize,
    hits: u64,
    misses: u64,
    fallback_allocations: u64,
}

#[derive(Default)]
struct OversizeState {
    checked_out: HashSet<BufferId>,
    allocations: u64,
}

struct PoolInner {
    id: u64,
    config: PoolConfig,
    classes: Vec<Mutex<ClassState>>,
    oversize: Mutex<OversizeState>,
    next_buffer: AtomicU64,
}

/// Counters for one size class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    /// Buffer capacity in elements.
    pub capacity: usize,
    /// Configured maximum of pooled buffers.
    pub ceiling: usize,
    /// Pooled buffers waiting on the free list.
    pub idle: usize,
    /// Buffers of this class currently held by consumers (pooled and fallback).
    pub checked_out: usize,
    /// Pooled buffers owned by the class, idle or checked out.
    pub pooled_total: usize,
    /// Checkouts served from the free list.
    pub hits: u64,
    /// Checkouts that allocated a new pooled buffer.
    pub misses: u64,
    /// Checkouts that allocated past the ceiling.
    pub fallback_allocations: u64,
    /// Fallback buffers not yet released.
    pub fallback_outstanding: usize,
}

impl ClassStats {
    /// Checks `idle + checked_out <= ceiling + fallback_allocations`.
    pub fn invariant_holds(&self) -> bool {
        self.pooled_total <= self.ceiling
            && self.idle + self.checked_out
                <= self.ceiling + self.fallback_allocations as usize
    }
}

/// Snapshot of all pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Per-class counters, ordered by capacity.
    pub classes: Vec<ClassStats>,
    /// Oversize buffers currently checked out.
    pub oversize_outstanding: usize,
    /// Oversize allocations since construction.
    pub oversize_allocations: u64,
}

impl PoolStats {
    /// Total buffers held by consumers, all classes plus oversize.
    pub fn checked_out(&self) -> usize {
        self.classes.iter().map(|c| c.checked_out).sum::<usize>() + self.oversize_outstanding
    }

    /// Total fallback allocations across classes.
    pub fn fallback_allocations(&self) -> u64 {
        self.classes.iter().map(|c| c.fallback_allocations).sum()
    }

    /// Returns true if every class satisfies its bookkeeping invariant.
    pub fn invariant_holds(&self) -> bool {
        self.classes.iter().all(ClassStats::invariant_holds)
    }
}

/// Shared handle to a set of size-classed buffer pools.
///
/// Cloning is cheap and every clone refers to the same pools.  Size classes
/// are fixed at construction.
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("id", &self.inner.id)
            .field("stats", &self.stats())
            .finish()
    }
}

fn allocate(capacity: usize, len: usize) -> Result<Vec<u64>> {
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| EngineError::AllocationFailure { elements: capacity })?;
    data.resize(len, 0);
    Ok(data)
}

impl PoolManager {
    /// Validates `config`, builds one pool per class and pre-warms them.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let config = PoolConfig {
            classes: config.sorted_classes(),
        };
        let mut classes = Vec::with_capacity(config.classes.len());
        for class in &config.classes {
            let mut idle = Vec::with_capacity(class.ceiling);
            for _ in 0..class.prewarm {
                idle.push(allocate(class.len, 0)?);
            }
            classes.push(Mutex::new(ClassState {
                capacity: class.len,
                ceiling: class.ceiling,
                pooled_total: idle.len(),
                idle,
                checked_out: HashSet::new(),
                fallback_outstanding: 0,
                hits: 0,
                misses: 0,
                fallback_allocations: 0,
            }));
        }
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            pool = id,
            classes = ?config.classes.iter().map(|c| c.len).collect::<Vec<_>>(),
            "memory pools initialised"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                config,
                classes,
                oversize: Mutex::new(OversizeState::default()),
                next_buffer: AtomicU64::new(1),
            }),
        })
    }

    /// The validated configuration, classes sorted by capacity.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Capacities of the configured classes, ascending.
    pub fn class_capacities(&self) -> Vec<usize> {
        self.inner.config.classes.iter().map(|c| c.len).collect()
    }

    /// Returns true if both handles refer to the same pools.
    pub fn same_pool(&self, other: &PoolManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Smallest class capacity that can hold `len` elements.
    pub fn class_for_len(&self, len: usize) -> Option<usize> {
        self.classes().find(|c| c.len >= len).map(|c| c.len)
    }

    fn classes(&self) -> impl Iterator<Item = &SizeClassConfig> {
        self.inner.config.classes.iter()
    }

    fn next_id(&self) -> BufferId {
        self.inner.next_buffer.fetch_add(1, Ordering::Relaxed)
    }

    /// Checks out a buffer of exactly the class with capacity `class_len`.
    ///
    /// Never blocks: an idle buffer is reused if there is one, otherwise a
    /// new pooled buffer is allocated while the class is under its ceiling,
    /// and past the ceiling a throwaway buffer is allocated instead.
    pub fn acquire(&self, class_len: usize) -> Result<Buffer> {
        let idx = self
            .classes()
            .position(|c| c.len == class_len)
            .ok_or_else(|| EngineError::shape(format!("{class_len} is not a size class")))?;
        self.acquire_in(idx, class_len)
    }

    /// Checks out a buffer holding `len` elements from the smallest class
    /// that fits, or an unpooled oversize buffer if none does.
    pub fn acquire_for_len(&self, len: usize) -> Result<Buffer> {
        if len == 0 {
            return Err(EngineError::shape("cannot check out an empty buffer"));
        }
        match self.classes().position(|c| c.len >= len) {
            Some(idx) => self.acquire_in(idx, len),
            None => self.acquire_oversize(len),
        }
    }

    fn acquire_in(&self, idx: usize, len: usize) -> Result<Buffer> {
        let id = self.next_id();
        let (recycled, origin, capacity) = {
            let mut class = self.inner.classes[idx].lock();
            class.checked_out.insert(id);
            if let Some(data) = class.idle.pop() {
                class.hits += 1;
                (Some(data), BufferOrigin::Pooled, class.capacity)
            } else if class.pooled_total < class.ceiling {
                class.pooled_total += 1;
                class.misses += 1;
                debug!(class = class.capacity, total = class.pooled_total, "pool miss");
                (None, BufferOrigin::Pooled, class.capacity)
            } else {
                class.fallback_allocations += 1;
                class.fallback_outstanding += 1;
                if class.fallback_allocations == 1 {
                    warn!(
                        class = class.capacity,
                        ceiling = class.ceiling,
                        "size class at ceiling, falling back to direct allocation"
                    );
                }
                (None, BufferOrigin::Fallback, class.capacity)
            }
        };

        let data = match recycled {
            Some(mut data) => {
                data.clear();
                data.resize(len, 0);
                data
            }
            None => match allocate(capacity, len) {
                Ok(data) => data,
                Err(err) => {
                    let mut class = self.inner.classes[idx].lock();
                    class.checked_out.remove(&id);
                    match origin {
                        BufferOrigin::Pooled => {
                            class.pooled_total -= 1;
                            class.misses -= 1;
                        }
                        _ => {
                            class.fallback_outstanding -= 1;
                            class.fallback_allocations -= 1;
                        }
                    }
                    error!(class = class.capacity, len, "allocation failed");
                    return Err(err);
                }
            },
        };

        Ok(Buffer {
            id,
            pool_id: self.inner.id,
            class: Some(idx),
            origin,
            data,
        })
    }

    fn acquire_oversize(&self, len: usize) -> Result<Buffer> {
        let data = allocate(len, len)?;
        let id = self.next_id();
        let mut oversize = self.inner.oversize.lock();
        oversize.checked_out.insert(id);
        oversize.allocations += 1;
        debug!(len, "oversize allocation");
        Ok(Buffer {
            id,
            pool_id: self.inner.id,
            class: None,
            origin: BufferOrigin::Oversize,
            data,
        })
    }

    /// Returns a buffer to the pool.
    ///
    /// Pooled buffers go back on their class's free list; fallback and
    /// oversize buffers are freed.  A buffer that this pool does not have
    /// checked out is rejected with [`EngineError::InvariantViolation`] and
    /// leaves the pool untouched.
    pub fn release(&self, buffer: Buffer) -> Result<()> {
        if buffer.pool_id != self.inner.id {
            error!(buffer = buffer.id, "release of a buffer owned by another pool");
            return Err(EngineError::invariant(format!(
                "buffer {} belongs to pool {}, not pool {}",
                buffer.id, buffer.pool_id, self.inner.id
            )));
        }
        let Some(idx) = buffer.class else {
            let mut oversize = self.inner.oversize.lock();
            if !oversize.checked_out.remove(&buffer.id) {
                error!(buffer = buffer.id, "oversize buffer released twice");
                return Err(EngineError::invariant(format!(
                    "oversize buffer {} is not checked out",
                    buffer.id
                )));
            }
            return Ok(());
        };

        let Some(slot) = self.inner.classes.get(idx) else {
            return Err(EngineError::invariant(format!(
                "buffer {} names unknown class {idx}",
                buffer.id
            )));
        };
        let mut class = slot.lock();
        if !class.checked_out.contains(&buffer.id) {
            error!(buffer = buffer.id, class = class.capacity, "buffer released twice");
            return Err(EngineError::invariant(format!(
                "buffer {} is not checked out of class {}",
                buffer.id, class.capacity
            )));
        }
        match buffer.origin {
            BufferOrigin::Pooled => {
                if class.idle.len() >= class.pooled_total {
                    return Err(EngineError::invariant(format!(
                        "class {} would hold more idle buffers than it owns",
                        class.capacity
                    )));
                }
                class.checked_out.remove(&buffer.id);
                class.idle.push(buffer.data);
            }
            BufferOrigin::Fallback => {
                if class.fallback_outstanding == 0 {
                    return Err(EngineError::invariant(format!(
                        "class {} has no fallback buffers outstanding",
                        class.capacity
                    )));
                }
                class.checked_out.remove(&buffer.id);
                class.fallback_outstanding -= 1;
            }
            BufferOrigin::Oversize => {
                return Err(EngineError::invariant(format!(
                    "oversize buffer {} carries a class index",
                    buffer.id
                )));
            }
        }
        Ok(())
    }

    /// Checks out `len` elements wrapped in a guard that releases on drop.
    pub fn checkout(&self, len: usize) -> Result<PooledBuffer> {
        let buffer = self.acquire_for_len(len)?;
        Ok(PooledBuffer {
            buffer,
            pool: self.clone(),
        })
    }

    /// Per-class counters; takes each class lock once.
    pub fn stats(&self) -> PoolStats {
        let classes = self
            .inner
            .classes
            .iter()
            .map(|slot| {
                let class = slot.lock();
                ClassStats {
                    capacity: class.capacity,
                    ceiling: class.ceiling,
                    idle: class.idle.len(),
                    checked_out: class.checked_out.len(),
                    pooled_total: class.pooled_total,
                    hits: class.hits,
                    misses: class.misses,
                    fallback_allocations: class.fallback_allocations,
                    fallback_outstanding: class.fallback_outstanding,
                }
            })
            .collect();
        let oversize = self.inner.oversize.lock();
        PoolStats {
            classes,
            oversize_outstanding: oversize.checked_out.len(),
            oversize_allocations: oversize.allocations,
        }
    }
}

/// Scoped checkout that returns its buffer to the pool when dropped.
pub struct PooledBuffer {
    buffer: Buffer,
    pool: PoolManager,
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl PooledBuffer {
    /// Exclusive-ownership marker of the underlying checkout.
    pub fn id(&self) -> BufferId {
        self.buffer.id
    }

    /// Origin of the underlying storage.
    pub fn origin(&self) -> BufferOrigin {
        self.buffer.origin
    }

    /// Allocated capacity in elements.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Releases now and surfaces any bookkeeping error instead of logging it.
    pub fn release(mut self) -> Result<()> {
        match self.take() {
            Some(buffer) => self.pool.release(buffer),
            None => Ok(()),
        }
    }

    fn take(&mut self) -> Option<Buffer> {
        // Pool ids start at 1, so a zero id marks an already-returned guard.
        if self.buffer.pool_id == 0 {
            return None;
        }
        Some(std::mem::replace(&mut self.buffer, Buffer::detached()))
    }
}

impl Deref for PooledBuffer {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        self.buffer.as_slice()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u64] {
        self.buffer.as_mut_slice()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.take() {
            if let Err(err) = self.pool.release(buffer) {
                error!(%err, "failed to return pooled buffer");
            }
        }
    }
}
