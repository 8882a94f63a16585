//! Table lock ownership
//!
//! The table lock is not reentrant. Each guard records the thread that
//! holds it, so a second acquisition from the same thread (typically while
//! a result set is alive) fails with `Busy` instead of blocking forever.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::engine::TableEngine;
use super::errors::{TableError, TableResult};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

fn current_thread() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// The engine lock plus the token of the thread holding it (0 when free)
pub(crate) struct EngineLock {
    engine: Mutex<TableEngine>,
    holder: AtomicU64,
}

impl EngineLock {
    pub(crate) fn new(engine: TableEngine) -> Self {
        Self {
            engine: Mutex::new(engine),
            holder: AtomicU64::new(0),
        }
    }

    /// Locks the engine, or returns `Busy` if this thread already holds it.
    pub(crate) fn acquire(&self) -> TableResult<EngineGuard<'_>> {
        let me = current_thread();
        if self.holder.load(Ordering::Acquire) == me {
            return Err(TableError::Busy);
        }
        Ok(self.lock_as(me))
    }

    /// Locks the engine, blocking until it is free.
    pub(crate) fn lock(&self) -> EngineGuard<'_> {
        self.lock_as(current_thread())
    }

    fn lock_as(&self, me: u64) -> EngineGuard<'_> {
        let guard = self.engine.lock();
        self.holder.store(me, Ordering::Release);
        EngineGuard {
            guard,
            holder: &self.holder,
        }
    }

    pub(crate) fn into_inner(self) -> TableEngine {
        self.engine.into_inner()
    }
}

/// Exclusive access to a table's engine
pub struct EngineGuard<'t> {
    guard: MutexGuard<'t, TableEngine>,
    holder: &'t AtomicU64,
}

impl Deref for EngineGuard<'_> {
    type Target = TableEngine;

    fn deref(&self) -> &TableEngine {
        &self.guard
    }
}

impl DerefMut for EngineGuard<'_> {
    fn deref_mut(&mut self) -> &mut TableEngine {
        &mut self.guard
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        // cleared before the mutex field unlocks
        self.holder.store(0, Ordering::Release);
    }
}
