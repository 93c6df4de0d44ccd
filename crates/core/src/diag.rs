//! Terminal output for diagnostics and shell messages
//!
//! Program diagnostics go to stderr as `<file>:<line>:<col>: error: ...`
//! with the offending token and a caret embedded in the message body.
//! Shell messages and program PRINT output go to stdout; each message is
//! a single locked write so lines from concurrent programs never
//! interleave.

use crate::token::SourcePos;
use std::io::Write;

pub const TERM_RED: &str = "\x1b[31m";
pub const TERM_YELLOW: &str = "\x1b[33m";
pub const TERM_RESET: &str = "\x1b[0m";

/// Report a program-scoped error at a token position.
pub fn err_msg(file: &str, pos: SourcePos, msg: &str) {
    let (line, col) = pos.reported();
    let mut err = std::io::stderr().lock();
    let _ = writeln!(
        err,
        "{file}:{line}:{col}: {TERM_RED}error: {TERM_RESET}{msg}"
    );
}

/// Report a warning at a token position; the program keeps running.
pub fn warn_msg(file: &str, pos: SourcePos, msg: &str) {
    let (line, col) = pos.reported();
    let mut err = std::io::stderr().lock();
    let _ = writeln!(
        err,
        "{file}:{line}:{col}: {TERM_YELLOW}warning: {TERM_RESET}{msg}"
    );
}

/// Print a shell status message (yellow, own line) to stdout.
pub fn shell_msg(msg: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{TERM_YELLOW}{msg}{TERM_RESET}");
    let _ = out.flush();
}

/// Print one line of program output to stdout as a single write.
pub fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

/// A system-level failure: the runtime itself is no longer healthy.
/// Reports the failed operation and terminates the process.
pub fn fatal(what: &str, err: &dyn std::fmt::Display) -> ! {
    let mut out = std::io::stderr().lock();
    let _ = writeln!(out, "{TERM_RED}fatal: {TERM_RESET}{what}: {err}");
    drop(out);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Output functions write straight to the real streams; what we can
    // pin down here is that the position adjustment they rely on holds.
    #[test]
    fn test_reported_position_used_by_messages() {
        let pos = SourcePos {
            line: 2,
            column: 5,
            prev_col: 11,
        };
        assert_eq!(pos.reported(), (2, 4));
        let wrapped = SourcePos {
            line: 2,
            column: 1,
            prev_col: 11,
        };
        assert_eq!(wrapped.reported(), (1, 11));
    }

    #[test]
    fn test_shell_msg_does_not_panic() {
        shell_msg("test message");
    }
}
