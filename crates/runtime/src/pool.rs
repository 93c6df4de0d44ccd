//! Admission and lifecycle of the worker pool
//!
//! The `Runtime` owns one worker per CPU (with a floor of four) and the
//! process-wide global table. New programs go to the least-loaded worker;
//! a program never migrates afterwards.

use crate::global::GlobalTable;
use crate::program::{Program, ProgramState};
use crate::worker::Worker;
use std::sync::Arc;
use tracing::{debug, info};

/// One worker per available CPU core, floor of four.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.max(4)
}

/// A snapshot of one worker for the shell's `list` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub index: usize,
    /// Id of the program currently in focus, if any.
    pub current: Option<i32>,
    pub count: usize,
}

pub struct Runtime {
    workers: Vec<Worker>,
    globals: Arc<GlobalTable>,
}

impl Runtime {
    pub fn new(worker_count: usize) -> Runtime {
        let globals = Arc::new(GlobalTable::new());
        let workers = (0..worker_count.max(1))
            .map(|i| Worker::spawn(i, Arc::clone(&globals)))
            .collect::<Vec<_>>();
        info!("runtime started with {} workers", workers.len());
        Runtime { workers, globals }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn globals(&self) -> &Arc<GlobalTable> {
        &self.globals
    }

    /// Attach a program to the worker with the fewest programs, ties
    /// going to the lowest index.
    pub fn attach(&self, prog: Program) {
        let mut min_idx = 0;
        let mut min_count = self.workers[0].count();
        for (i, worker) in self.workers.iter().enumerate().skip(1) {
            let count = worker.count();
            if count < min_count {
                min_count = count;
                min_idx = i;
            }
        }
        debug!(
            "attaching program {} to worker {} with {} programs",
            prog.id(),
            min_idx,
            min_count
        );
        self.workers[min_idx].attach(prog);
    }

    /// Mark the program with this id for termination.
    ///
    /// A program waiting in a queue is halted in place (its semaphore
    /// counter forced up first if it is blocked, so the next tick cannot
    /// hang); the program a worker is currently running is killed at the
    /// end of its slice. Returns false when no worker holds the id.
    pub fn kill(&self, id: i32) -> bool {
        for worker in &self.workers {
            let mut q = worker.shared.lock();
            if q.current == Some(id) {
                q.kill_current = true;
                return true;
            }
            if let Some(prog) = q.programs.iter_mut().find(|p| p.id() == id) {
                if prog.state() == ProgramState::Blocked {
                    if let Some(var) = prog.blocked_on.clone() {
                        var.force_release(prog.blocked_idx);
                    }
                }
                prog.stop(true);
                return true;
            }
        }
        false
    }

    pub fn list(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|worker| {
                let q = worker.shared.lock();
                WorkerStatus {
                    index: worker.shared.index,
                    current: q.current.or_else(|| q.programs.front().map(|p| p.id())),
                    count: q.programs.len() + usize::from(q.current.is_some()),
                }
            })
            .collect()
    }

    /// Programs alive across all workers.
    pub fn total_programs(&self) -> usize {
        self.workers.iter().map(|w| w.count()).sum()
    }

    /// Stop every worker, join their threads, and drop residual programs.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
