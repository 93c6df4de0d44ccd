//! Global variable / semaphore table
//!
//! One process-wide map from name to a dense vector of counters. A
//! counter doubles as a counting semaphore: `UP` increments and wakes
//! waiters, `DOWN` decrements, blocking the program until the counter is
//! positive. Vectors grow on first use of an index and never shrink.
//!
//! Locking: the table mutex guards lookup/insert only and is released
//! before an entry's own mutex is taken; the entry mutex serializes every
//! counter access. `up` broadcasts rather than signals because programs
//! on several workers can block on the same `(variable, index)` pair.

use crate::program::{Program, ProgramState};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Value new counters start at, whether created by insertion or growth.
#[cfg(feature = "init-with-one")]
const INITIAL_COUNT: i32 = 1;
#[cfg(not(feature = "init-with-one"))]
const INITIAL_COUNT: i32 = 0;

/// The configured initial counter value (0, or 1 under `init-with-one`).
pub fn initial_count() -> i32 {
    INITIAL_COUNT
}

pub struct GlobalVar {
    counts: Mutex<Vec<i32>>,
    cond: Condvar,
}

impl GlobalVar {
    fn with_len(len: usize) -> Self {
        GlobalVar {
            counts: Mutex::new(vec![INITIAL_COUNT; len]),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<i32>> {
        self.counts
            .lock()
            .expect("global variable lock poisoned - a worker panicked mid-update")
    }

    fn grow(counts: &mut Vec<i32>, idx: usize) {
        if idx >= counts.len() {
            counts.resize(idx + 1, INITIAL_COUNT);
        }
    }

    /// Force the counter to 1 so the owning program's next blocked tick
    /// releases it. Used by kill.
    pub(crate) fn force_release(&self, idx: usize) {
        let mut counts = self.lock();
        GlobalVar::grow(&mut counts, idx);
        counts[idx] = 1;
        self.cond.notify_all();
    }
}

#[derive(Default)]
pub struct GlobalTable {
    map: Mutex<HashMap<String, Arc<GlobalVar>>>,
}

impl GlobalTable {
    pub fn new() -> Self {
        GlobalTable::default()
    }

    /// Look a name up, inserting a fresh variable sized `idx + 1` if it
    /// does not exist yet. The table lock is released before the caller
    /// touches the entry.
    fn fetch(&self, name: &str, idx: usize) -> Arc<GlobalVar> {
        let mut map = self
            .map
            .lock()
            .expect("global table lock poisoned - a worker panicked mid-insert");
        map.entry(name.to_string())
            .or_insert_with(|| {
                debug!("global variable {} created with length {}", name, idx + 1);
                Arc::new(GlobalVar::with_len(idx + 1))
            })
            .clone()
    }

    pub fn load(&self, name: &str, idx: usize) -> i32 {
        let var = self.fetch(name, idx);
        let mut counts = var.lock();
        GlobalVar::grow(&mut counts, idx);
        counts[idx]
    }

    pub fn store(&self, name: &str, idx: usize, value: i32) {
        let var = self.fetch(name, idx);
        let mut counts = var.lock();
        GlobalVar::grow(&mut counts, idx);
        counts[idx] = value;
    }

    /// Increment the counter and wake every waiter.
    pub fn up(&self, name: &str, idx: usize) {
        let var = self.fetch(name, idx);
        let mut counts = var.lock();
        if idx < counts.len() {
            counts[idx] += 1;
            var.cond.notify_all();
        } else {
            // Nobody can be waiting past the current length, so growth
            // needs no wakeup.
            counts.resize(idx + 1, INITIAL_COUNT);
            counts[idx] = INITIAL_COUNT + 1;
        }
    }

    /// Mark the program blocked on `(name, idx)`. The decrement and the
    /// actual wait happen in the scheduler's [`blocked_tick`].
    pub fn down(&self, prog: &mut Program, name: &str, idx: usize) {
        let var = self.fetch(name, idx);
        {
            let mut counts = var.lock();
            GlobalVar::grow(&mut counts, idx);
        }
        prog.blocked_idx = idx;
        prog.blocked_on = Some(var);
        prog.state = ProgramState::Blocked;
    }

    /// Read a counter without creating anything. Test and shell helper.
    pub fn peek(&self, name: &str, idx: usize) -> Option<i32> {
        let var = {
            let map = self
                .map
                .lock()
                .expect("global table lock poisoned - a worker panicked mid-insert");
            map.get(name).cloned()?
        };
        let counts = var.lock();
        counts.get(idx).copied()
    }

    /// Current length of a variable's counter vector.
    pub fn len_of(&self, name: &str) -> Option<usize> {
        let var = {
            let map = self
                .map
                .lock()
                .expect("global table lock poisoned - a worker panicked mid-insert");
            map.get(name).cloned()?
        };
        let counts = var.lock();
        Some(counts.len())
    }
}

/// One bounded attempt to take the semaphore a blocked program waits on.
///
/// Decrements and resumes the program if the counter is positive;
/// otherwise waits on the variable's condition variable for at most
/// `wait` and re-checks once. The bounded wait keeps the owning worker
/// responsive to kills and to counter updates it could not observe.
pub fn blocked_tick(prog: &mut Program, wait: Duration) {
    let Some(var) = prog.blocked_on.clone() else {
        return;
    };

    let mut counts = var.lock();
    if counts[prog.blocked_idx] <= 0 {
        let (guard, _timeout) = var
            .cond
            .wait_timeout(counts, wait)
            .expect("global variable lock poisoned - a worker panicked mid-update");
        counts = guard;
    }

    if counts[prog.blocked_idx] > 0 {
        counts[prog.blocked_idx] -= 1;
        if prog.state == ProgramState::Blocked {
            prog.state = ProgramState::InstructionLine;
            prog.blocked_on = None;
        }
    }
}
