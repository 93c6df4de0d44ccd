//! Worker threads
//!
//! Each worker owns a queue of programs and runs round-robin over it on a
//! dedicated OS thread: check out the front program, spend one
//! pseudo-random time slice on it, put it back at the tail (or reap it).
//! Because every visit executes at least one instruction line before the
//! slice is measured, throughput divides evenly across a worker's
//! programs, and the jitter in the slice keeps pairs of mutually-waiting
//! programs from phase-locking.
//!
//! A program is only ever touched by its worker's thread. Kills aimed at
//! the program currently checked out are parked in the queue
//! (`kill_current`) and applied when the slice ends.

use crate::global::{self, GlobalTable};
use crate::interp;
use crate::program::{Program, ProgramState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simbly_core::diag;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound on one scheduling slice, in nanoseconds. An instruction
/// line takes on this order of time to execute.
const TIME_SLICE_MAX_NSEC: u64 = 10_000_000;

/// Most lines one program may execute in a single visit. Bounds a tight
/// branch loop, whose lines can be far cheaper than the slice assumes.
const MAX_LINES_PER_SLICE: u32 = 128;

pub(crate) struct WorkerQueue {
    pub programs: VecDeque<Program>,
    /// Id of the program currently checked out by the worker thread.
    pub current: Option<i32>,
    /// A kill arrived for the checked-out program; applied at slice end.
    pub kill_current: bool,
}

pub(crate) struct WorkerShared {
    pub index: usize,
    pub queue: Mutex<WorkerQueue>,
    pub not_empty: Condvar,
    pub running: AtomicBool,
    pub globals: Arc<GlobalTable>,
}

impl WorkerShared {
    pub fn lock(&self) -> MutexGuard<'_, WorkerQueue> {
        self.queue
            .lock()
            .expect("worker queue lock poisoned - a thread panicked mid-update")
    }
}

pub(crate) struct Worker {
    pub shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(index: usize, globals: Arc<GlobalTable>) -> Worker {
        let shared = Arc::new(WorkerShared {
            index,
            queue: Mutex::new(WorkerQueue {
                programs: VecDeque::new(),
                current: None,
                kill_current: false,
            }),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            globals,
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("simbly-worker-{index}"))
            .spawn(move || worker_loop(thread_shared));
        let handle = match handle {
            Ok(h) => h,
            Err(e) => diag::fatal("spawning worker thread", &e),
        };

        Worker {
            shared,
            handle: Some(handle),
        }
    }

    /// Programs on this worker, the checked-out one included.
    pub fn count(&self) -> usize {
        let q = self.shared.lock();
        q.programs.len() + usize::from(q.current.is_some())
    }

    pub fn attach(&self, prog: Program) {
        debug!("program {} attached to worker {}", prog.id(), self.shared.index);
        let mut q = self.shared.lock();
        q.programs.push_back(prog);
        self.shared.not_empty.notify_all();
    }

    /// Stop the thread, join it, and drop any residual programs.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.not_empty.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                diag::shell_msg(&format!("worker {} panicked", self.shared.index));
            }
            self.shared.lock().programs.clear();
            info!("worker {} stopped", self.shared.index);
        }
    }
}

fn worker_loop(shared: Arc<WorkerShared>) {
    let mut rng = StdRng::from_entropy();
    info!("worker {} started", shared.index);

    loop {
        let mut prog = {
            let mut q = shared.lock();
            while shared.running.load(Ordering::Acquire) && q.programs.is_empty() {
                q = shared
                    .not_empty
                    .wait(q)
                    .expect("worker queue lock poisoned - a thread panicked mid-update");
            }
            if !shared.running.load(Ordering::Acquire) {
                return;
            }
            let prog = q.programs.pop_front().expect("queue is non-empty");
            q.current = Some(prog.id());
            q.kill_current = false;
            prog
        };

        let slice = Duration::from_nanos(rng.gen_range(0..TIME_SLICE_MAX_NSEC));
        run_slice(&mut prog, slice, &shared.globals);

        let mut q = shared.lock();
        if q.kill_current {
            prog.stop(true);
            q.kill_current = false;
        }
        q.current = None;

        if prog.done() {
            drop(q);
            if prog.error_flag() {
                diag::shell_msg(&format!("Program {} was killed unexpectedly", prog.id()));
            } else {
                diag::shell_msg(&format!("Program {} finished", prog.id()));
            }
        } else {
            q.programs.push_back(prog);
            drop(q);
        }

        if !shared.running.load(Ordering::Acquire) {
            return;
        }
    }
}

/// Spend one time slice on a program, dispatching on its state.
fn run_slice(prog: &mut Program, slice: Duration, globals: &GlobalTable) {
    match prog.state() {
        ProgramState::MagicLine | ProgramState::InstructionLine => {
            let mut budget = slice.as_nanos() as i64;
            let mut lines = 0u32;
            loop {
                let start = Instant::now();
                interp::interpret_next_line(prog, globals);
                budget -= start.elapsed().as_nanos() as i64;
                lines += 1;
                if budget <= 0 || lines >= MAX_LINES_PER_SLICE {
                    break;
                }
                if prog.state() != ProgramState::InstructionLine {
                    break;
                }
            }
        }
        ProgramState::Sleeping => {
            if prog.sleep_left > slice {
                prog.sleep_left -= slice;
                std::thread::sleep(slice);
            } else {
                std::thread::sleep(prog.sleep_left);
                prog.sleep_left = Duration::ZERO;
                prog.state = ProgramState::InstructionLine;
            }
        }
        ProgramState::Blocked => global::blocked_tick(prog, slice),
        ProgramState::LastLine | ProgramState::Finished => {}
    }
}
