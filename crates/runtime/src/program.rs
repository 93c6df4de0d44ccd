//! Per-program state
//!
//! A `Program` owns everything one running Simbly program needs: the open
//! source file with the scanner's cursor and one-character lookahead, the
//! argument vector, the table of local variables and labels, the
//! translated line, and the scheduling state. A program is only ever
//! touched by the worker that owns it; cross-thread communication happens
//! through the global table and the worker queue.

use crate::global::GlobalVar;
use simbly_core::token::SourcePos;
use simbly_core::{TokenStream, diag};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::debug;

// Program ids are process-wide, start at 1 and are never reused.
static NEXT_PROGRAM_ID: AtomicI32 = AtomicI32::new(1);

fn next_program_id() -> i32 {
    NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// The magic first line has not been consumed yet.
    MagicLine,
    InstructionLine,
    /// The scanner hit EOF while reading the current line; the program
    /// finishes once this line has executed.
    LastLine,
    Sleeping,
    Blocked,
    Finished,
}

/// Where a label definition lives: the file offset just past the label
/// word, plus the cursor to restore when branching back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    pub offset: u64,
    pub line: u32,
    pub column: u32,
    pub prev_col: u32,
}

/// Labels and variables share one namespace; a name is at most one of
/// the two at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    /// A scalar is an array of length 1.
    Array(Vec<i32>),
    Label(LabelRecord),
}

pub struct Program {
    pub(crate) file: BufReader<File>,
    pub(crate) name: String,
    /// `argv[0]` = id, `argv[1]` = user-arg count, `argv[2..]` = user args.
    pub(crate) argv: Vec<i32>,
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) prev_col: u32,
    /// One-character lookahead; `None` once EOF has been consumed.
    pub(crate) c: Option<u8>,
    pub(crate) state: ProgramState,
    pub(crate) sleep_left: Duration,
    pub(crate) blocked_on: Option<Arc<GlobalVar>>,
    pub(crate) blocked_idx: usize,
    pub(crate) locals: HashMap<String, LocalEntry>,
    pub(crate) stream: TokenStream,
    pub(crate) error_flag: bool,
}

impl Program {
    /// Open a source file and build the initial program state.
    ///
    /// `args` are the user-supplied integers; the id and the argument
    /// count are prepended per the argv layout.
    pub fn new(path: impl AsRef<Path>, args: &[i32]) -> io::Result<Program> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let id = next_program_id();
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(id);
        argv.push(args.len() as i32);
        argv.extend_from_slice(args);

        debug!("program {} created from {}", id, path.display());

        Ok(Program {
            file: BufReader::new(file),
            name: path.display().to_string(),
            argv,
            line: 1,
            column: 1,
            prev_col: 0,
            c: Some(b' '),
            state: ProgramState::MagicLine,
            sleep_left: Duration::ZERO,
            blocked_on: None,
            blocked_idx: 0,
            locals: HashMap::new(),
            stream: TokenStream::new(),
            error_flag: false,
        })
    }

    pub fn id(&self) -> i32 {
        self.argv[0]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag
    }

    /// Finished, either normally or with the error flag set.
    pub fn done(&self) -> bool {
        self.state == ProgramState::Finished || self.error_flag
    }

    /// Halt the program; `err` marks the termination as abnormal.
    pub fn stop(&mut self, err: bool) {
        self.state = ProgramState::Finished;
        if err {
            self.error_flag = true;
        }
    }

    /// The scanner's current cursor as a token position.
    pub(crate) fn pos(&self) -> SourcePos {
        SourcePos {
            line: self.line,
            column: self.column,
            prev_col: self.prev_col,
        }
    }

    /// Report an error at the scanner's current position and halt.
    pub(crate) fn error_here(&mut self, msg: &str) {
        self.stop(true);
        diag::err_msg(&self.name, self.pos(), msg);
    }

    /// Report an error at a previously captured token position and halt.
    pub(crate) fn error_at(&mut self, pos: SourcePos, msg: &str) {
        self.stop(true);
        diag::err_msg(&self.name, pos, msg);
    }

    pub(crate) fn warn_at(&self, pos: SourcePos, msg: &str) {
        diag::warn_msg(&self.name, pos, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source_file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().expect("create temp source");
        f.write_all(contents.as_bytes()).expect("write temp source");
        f
    }

    #[test]
    fn test_argv_layout() {
        let f = source_file("#PROGRAM\nRETURN\n");
        let prog = Program::new(f.path(), &[42, 17]).expect("open program");
        assert_eq!(prog.argv[0], prog.id());
        assert_eq!(prog.argv[1], 2);
        assert_eq!(&prog.argv[2..], &[42, 17]);
        assert_eq!(prog.argv.len(), prog.argv[1] as usize + 2);
    }

    #[test]
    fn test_ids_are_unique_and_positive() {
        let f = source_file("#PROGRAM\n");
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let prog = Program::new(f.path(), &[]).expect("open program");
            assert!(prog.id() >= 1);
            assert!(seen.insert(prog.id()), "id reused");
        }
    }

    #[test]
    fn test_initial_state() {
        let f = source_file("#PROGRAM\n");
        let prog = Program::new(f.path(), &[]).expect("open program");
        assert_eq!(prog.state(), ProgramState::MagicLine);
        assert!(!prog.error_flag());
        assert_eq!(prog.line, 1);
        assert_eq!(prog.column, 1);
        assert_eq!(prog.prev_col, 0);
    }

    #[test]
    fn test_stop_sets_error_flag_only_on_request() {
        let f = source_file("#PROGRAM\n");
        let mut prog = Program::new(f.path(), &[]).expect("open program");
        prog.stop(false);
        assert_eq!(prog.state(), ProgramState::Finished);
        assert!(!prog.error_flag());
        prog.stop(true);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        assert!(Program::new("/no/such/simbly/file.sim", &[]).is_err());
    }
}
