//! Simbly runtime
//!
//! Executes Simbly programs: a per-program scanner/interpreter over a
//! lazily-read source file, a process-wide table of global counters
//! usable as semaphores, and a pool of round-robin worker threads that
//! time-slice many programs concurrently.
//!
//! The shell crate drives this library; embedding it directly looks like:
//!
//! ```rust,ignore
//! let runtime = simbly_runtime::Runtime::new(simbly_runtime::default_worker_count());
//! let prog = simbly_runtime::Program::new("job.sim", &[42])?;
//! runtime.attach(prog);
//! ```

pub mod global;
pub mod pool;
pub mod program;

mod interp;
mod scanner;
mod worker;

pub use global::GlobalTable;
pub use interp::interpret_next_line;
pub use pool::{Runtime, WorkerStatus, default_worker_count};
pub use program::{Program, ProgramState};
