//! Completion reference count of a split request.
//!
//! Increments happen while sub-requests are issued, decrements as they
//! complete. A decrement uses `AcqRel` and a waiter observes zero with
//! `Acquire`, so everything a completing thread wrote before its decrement is
//! visible to the owner once `wait` returns.

use std::hint;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::common::exception::{ProtocolViolation, fatal};

#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicI32,
    lock: Mutex<()>,
    drained: Condvar,
}

impl RefCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new count.
    pub fn inc(&self) -> i32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new count. Dropping below zero is fatal.
    pub fn dec(&self) -> i32 {
        let now = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if now < 0 {
            fatal(ProtocolViolation::RefCountUnderflow);
        }
        if now == 0 {
            // Taking the lock orders the notify after a waiter's check.
            let _guard = self.lock.lock();
            self.drained.notify_all();
        }
        now
    }

    pub fn get(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Parks the caller until the count reaches zero.
    pub fn wait(&self) {
        if self.get() == 0 {
            return;
        }
        let mut guard = self.lock.lock();
        while self.get() > 0 {
            self.drained.wait(&mut guard);
        }
    }

    /// Spins until the count reaches zero. Only for owners that know the wait is short.
    pub fn wait_spin(&self) {
        while self.get() > 0 {
            hint::spin_loop();
        }
    }

    /// Resets to zero. Only valid while no other thread holds a reference.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}
