//! Instruction interpreter
//!
//! Pulls tokens off a program's translated line and executes them against
//! the program's local table and the process-wide global table. Handlers
//! never propagate errors upward: every program-scoped failure reports a
//! diagnostic at the offending token and halts just that program.

use crate::global::GlobalTable;
use crate::program::{LabelRecord, LocalEntry, Program, ProgramState};
use simbly_core::diag;
use simbly_core::token::{Opcode, SourcePos, Token, TokenKind, VarVal};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

/// Interpret one source line of `prog`.
///
/// Consumes the magic line first if it has not been seen yet. A program
/// whose source is exhausted transitions to `Finished`.
pub fn interpret_next_line(prog: &mut Program, globals: &GlobalTable) {
    match prog.state {
        ProgramState::MagicLine => {
            prog.parse_magic();
            if prog.state == ProgramState::Finished {
                return;
            }
            prog.tokenize_next_line();
        }
        ProgramState::InstructionLine => prog.tokenize_next_line(),
        _ => {}
    }

    if matches!(
        prog.state,
        ProgramState::InstructionLine | ProgramState::LastLine
    ) {
        exec_instruction_line(prog, globals);
        if prog.state == ProgramState::LastLine {
            prog.state = ProgramState::Finished;
        }
    }
}

fn exec_instruction_line(prog: &mut Program, globals: &GlobalTable) {
    let Some(mut tok) = prog.stream.pop() else {
        prog.state = ProgramState::Finished;
        return;
    };

    if matches!(tok.kind, TokenKind::Label { .. }) {
        let TokenKind::Label { name, offset } = tok.kind else {
            return;
        };
        if insert_label(prog, &name, offset, tok.pos).is_none() {
            return;
        }
        // The tokenizer guarantees an instruction follows a label.
        let Some(next) = prog.stream.pop() else {
            return;
        };
        tok = next;
    }

    let TokenKind::Instruction(op) = tok.kind else {
        debug_assert!(false, "translated line must start with an instruction");
        return;
    };

    match op {
        Opcode::Load => load_handler(prog, globals),
        Opcode::Store => store_handler(prog, globals),
        Opcode::Set => set_handler(prog),
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            primitive_op_handler(prog, op)
        }
        Opcode::Brgt
        | Opcode::Brge
        | Opcode::Brlt
        | Opcode::Brle
        | Opcode::Breq
        | Opcode::Bra => branch_handler(prog, op),
        Opcode::Down | Opcode::Up => semaphore_handler(prog, globals, op),
        Opcode::Sleep => sleep_handler(prog),
        Opcode::Print => print_handler(prog),
        Opcode::Return => prog.state = ProgramState::Finished,
    }
}

/// Record a label definition. Re-inserting the same label at the same
/// offset is a no-op; anything else is a namespace collision.
fn insert_label(prog: &mut Program, name: &str, offset: u64, pos: SourcePos) -> Option<()> {
    match prog.locals.get(name) {
        Some(LocalEntry::Label(rec)) if rec.offset == offset => Some(()),
        Some(LocalEntry::Label(_)) => {
            prog.error_at(
                pos,
                &format!("can't redefine label with the same name!\n\t{name}\n\t^"),
            );
            None
        }
        Some(LocalEntry::Array(_)) => {
            prog.error_at(
                pos,
                &format!("there's already a variable with the same name defined\n\t{name}\n\t^"),
            );
            None
        }
        None => {
            debug!("label {} offset = {}", name, offset);
            prog.locals.insert(
                name.to_string(),
                LocalEntry::Label(LabelRecord {
                    offset,
                    line: pos.line,
                    column: pos.column,
                    prev_col: pos.prev_col,
                }),
            );
            Some(())
        }
    }
}

enum Access {
    Value(i32),
    LabelCollision,
    WholeArray,
}

/// Evaluate a VarVal. Unknown names spring into existence as zeroes;
/// reads past an array's end grow it first.
fn varval_get(prog: &mut Program, vv: &VarVal, pos: SourcePos) -> Option<i32> {
    match vv {
        VarVal::Value(v) => Some(*v),
        VarVal::Var(name) => {
            if name == "argc" {
                return Some(prog.argv[1]);
            }
            if name == "argv" {
                prog.error_at(
                    pos,
                    "arrays can't be used by their names; only by their indices\n\targv\n\t^",
                );
                return None;
            }
            let access = match prog
                .locals
                .entry(name.clone())
                .or_insert_with(|| LocalEntry::Array(vec![0]))
            {
                LocalEntry::Label(_) => Access::LabelCollision,
                LocalEntry::Array(a) if a.len() > 1 => Access::WholeArray,
                LocalEntry::Array(a) => Access::Value(a[0]),
            };
            finish_access(prog, name, pos, access)
        }
        VarVal::Arr { name, index } => {
            let idx = varval_get(prog, index, pos)?;
            if name == "argv" {
                let argc = prog.argv[1];
                if idx < 0 || idx >= argc {
                    prog.error_at(
                        pos,
                        &format!(
                            "tried to access area outside of argv array which is of size {argc}\n\t{name}\n\t^"
                        ),
                    );
                    return None;
                }
                return Some(prog.argv[idx as usize + 2]);
            }
            if idx < 0 {
                prog.error_at(
                    pos,
                    &format!("arrays can't have negative indices\n\t{name}\n\t^"),
                );
                return None;
            }
            let idx = idx as usize;
            let access = match prog
                .locals
                .entry(name.clone())
                .or_insert_with(|| LocalEntry::Array(vec![0; idx + 1]))
            {
                LocalEntry::Label(_) => Access::LabelCollision,
                LocalEntry::Array(a) => {
                    if idx >= a.len() {
                        a.resize(idx + 1, 0);
                    }
                    Access::Value(a[idx])
                }
            };
            finish_access(prog, name, pos, access)
        }
    }
}

fn finish_access(prog: &mut Program, name: &str, pos: SourcePos, access: Access) -> Option<i32> {
    match access {
        Access::Value(v) => Some(v),
        Access::LabelCollision => {
            prog.error_at(
                pos,
                &format!("there's already a label with the same name defined\n\t{name}\n\t^"),
            );
            None
        }
        Access::WholeArray => {
            prog.error_at(
                pos,
                &format!("arrays can't be used by their names; only by their indices\n\t{name}\n\t^"),
            );
            None
        }
    }
}

/// Assign to a VarVal target, growing arrays as needed.
fn varval_set(prog: &mut Program, vv: &VarVal, pos: SourcePos, value: i32) -> Option<()> {
    match vv {
        // The scanner rejects literal assignment targets.
        VarVal::Value(_) => None,
        VarVal::Var(name) => {
            if name == "argc" || name == "argv" {
                prog.error_at(
                    pos,
                    &format!(
                        "the value of {name} is constant; setting it to another value isn't allowed\n\t{name}\n\t^"
                    ),
                );
                return None;
            }
            let access = match prog
                .locals
                .entry(name.clone())
                .or_insert_with(|| LocalEntry::Array(vec![0]))
            {
                LocalEntry::Label(_) => Access::LabelCollision,
                LocalEntry::Array(a) if a.len() > 1 => Access::WholeArray,
                LocalEntry::Array(a) => {
                    a[0] = value;
                    Access::Value(value)
                }
            };
            finish_access(prog, name, pos, access).map(|_| ())
        }
        VarVal::Arr { name, index } => {
            let idx = varval_get(prog, index, pos)?;
            if name == "argv" {
                prog.error_at(
                    pos,
                    "the value of argv is constant; setting it to another value isn't allowed\n\targv\n\t^",
                );
                return None;
            }
            if idx < 0 {
                prog.error_at(
                    pos,
                    &format!("arrays can't have negative indices\n\t{name}\n\t^"),
                );
                return None;
            }
            let idx = idx as usize;
            let access = match prog
                .locals
                .entry(name.clone())
                .or_insert_with(|| LocalEntry::Array(vec![0; idx + 1]))
            {
                LocalEntry::Label(_) => Access::LabelCollision,
                LocalEntry::Array(a) => {
                    if idx >= a.len() {
                        a.resize(idx + 1, 0);
                    }
                    debug!("setting the position {} of the array to the value {}", idx, value);
                    a[idx] = value;
                    Access::Value(value)
                }
            };
            finish_access(prog, name, pos, access).map(|_| ())
        }
    }
}

fn token_get(prog: &mut Program, tok: &Token) -> Option<i32> {
    match &tok.kind {
        TokenKind::Operand(vv) => varval_get(prog, vv, tok.pos),
        _ => None,
    }
}

fn token_set(prog: &mut Program, tok: &Token, value: i32) -> Option<()> {
    match &tok.kind {
        TokenKind::Operand(vv) => varval_set(prog, vv, tok.pos, value),
        _ => None,
    }
}

/// A global operand is a bare name or an indexed name; its index is
/// evaluated against the program's locals before the table is touched.
fn resolve_global_operand(prog: &mut Program, tok: &Token, op: Opcode) -> Option<(String, usize)> {
    match &tok.kind {
        TokenKind::Operand(VarVal::Var(name)) => Some((name.clone(), 0)),
        TokenKind::Operand(VarVal::Arr { name, index }) => {
            let idx = varval_get(prog, index, tok.pos)?;
            if idx < 0 {
                prog.error_at(
                    tok.pos,
                    &format!("arrays can't have negative indices\n\t{name}\n\t^"),
                );
                return None;
            }
            Some((name.clone(), idx as usize))
        }
        _ => {
            prog.error_at(
                tok.pos,
                &format!(
                    "{} instruction expects a global variable name, not a value",
                    op.name()
                ),
            );
            None
        }
    }
}

fn load_handler(prog: &mut Program, globals: &GlobalTable) {
    let Some(var_tok) = prog.stream.pop() else { return };
    let Some(global_tok) = prog.stream.pop() else { return };

    let Some((name, idx)) = resolve_global_operand(prog, &global_tok, Opcode::Load) else {
        return;
    };
    let value = globals.load(&name, idx);
    token_set(prog, &var_tok, value);
}

fn store_handler(prog: &mut Program, globals: &GlobalTable) {
    let Some(global_tok) = prog.stream.pop() else { return };
    let Some(varval_tok) = prog.stream.pop() else { return };

    let Some((name, idx)) = resolve_global_operand(prog, &global_tok, Opcode::Store) else {
        return;
    };
    let Some(value) = token_get(prog, &varval_tok) else {
        return;
    };
    globals.store(&name, idx, value);
}

fn set_handler(prog: &mut Program) {
    let Some(var_tok) = prog.stream.pop() else { return };
    let Some(val_tok) = prog.stream.pop() else { return };

    let Some(value) = token_get(prog, &val_tok) else {
        return;
    };
    token_set(prog, &var_tok, value);
}

fn primitive_op_handler(prog: &mut Program, op: Opcode) {
    let Some(res_tok) = prog.stream.pop() else { return };
    let Some(a_tok) = prog.stream.pop() else { return };
    let Some(b_tok) = prog.stream.pop() else { return };

    let Some(a) = token_get(prog, &a_tok) else { return };
    let Some(b) = token_get(prog, &b_tok) else { return };

    let result = match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div | Opcode::Mod => {
            if b == 0 {
                prog.error_at(
                    b_tok.pos,
                    &format!("division by zero in {} instruction", op.name()),
                );
                return;
            }
            if op == Opcode::Div {
                a.wrapping_div(b)
            } else {
                a.wrapping_rem(b)
            }
        }
        _ => return,
    };

    token_set(prog, &res_tok, result);
}

fn branch_handler(prog: &mut Program, op: Opcode) {
    let jump = if op == Opcode::Bra {
        true
    } else {
        let Some(a_tok) = prog.stream.pop() else { return };
        let Some(b_tok) = prog.stream.pop() else { return };
        let Some(a) = token_get(prog, &a_tok) else { return };
        let Some(b) = token_get(prog, &b_tok) else { return };
        match op {
            Opcode::Brgt => a > b,
            Opcode::Brge => a >= b,
            Opcode::Brlt => a < b,
            Opcode::Brle => a <= b,
            Opcode::Breq => a == b,
            _ => return,
        }
    };

    let Some(label_tok) = prog.stream.pop() else { return };
    let TokenKind::Label { name, .. } = &label_tok.kind else {
        return;
    };

    if jump {
        branch_to(prog, &name.clone(), label_tok.pos);
    }
}

fn branch_to(prog: &mut Program, target: &str, pos: SourcePos) {
    match prog.locals.get(target) {
        Some(LocalEntry::Label(rec)) => {
            let rec = rec.clone();
            prog.seek_to_label(&rec);
        }
        Some(LocalEntry::Array(_)) => {
            prog.error_at(
                pos,
                &format!("branching location name is already defined as a variable\n\t{target}\n\t^"),
            );
        }
        None => scan_forward_to_label(prog, target, pos),
    }
}

/// The target has not been seen yet: scan the file line by line,
/// discarding tokens but recording every line-leading label, until the
/// target turns up or the file ends.
fn scan_forward_to_label(prog: &mut Program, target: &str, pos: SourcePos) {
    loop {
        prog.tokenize_next_line();
        let first = prog.stream.pop();
        prog.stream.clear();

        let Some(tok) = first else {
            // EOF: every remaining line was scanned without a match.
            if !prog.error_flag {
                prog.error_at(
                    pos,
                    &format!("couldn't jump to undefined label\n\t{target}\n\t^"),
                );
            }
            return;
        };

        if prog.error_flag {
            return;
        }

        if let TokenKind::Label { name, offset } = &tok.kind {
            let (name, offset) = (name.clone(), *offset);
            if insert_label(prog, &name, offset, tok.pos).is_none() {
                return;
            }
            if name == target {
                let rec = LabelRecord {
                    offset,
                    line: tok.pos.line,
                    column: tok.pos.column,
                    prev_col: tok.pos.prev_col,
                };
                prog.seek_to_label(&rec);
                return;
            }
        }

        if prog.state == ProgramState::Finished {
            if !prog.error_flag {
                prog.error_at(
                    pos,
                    &format!("couldn't jump to undefined label\n\t{target}\n\t^"),
                );
            }
            return;
        }
    }
}

fn semaphore_handler(prog: &mut Program, globals: &GlobalTable, op: Opcode) {
    let Some(tok) = prog.stream.pop() else { return };
    let Some((name, idx)) = resolve_global_operand(prog, &tok, op) else {
        return;
    };
    match op {
        Opcode::Down => globals.down(prog, &name, idx),
        Opcode::Up => globals.up(&name, idx),
        _ => {}
    }
}

fn sleep_handler(prog: &mut Program) {
    let Some(tok) = prog.stream.pop() else { return };
    let pos = tok.pos;
    let Some(duration) = token_get(prog, &tok) else {
        return;
    };

    debug!("sleeping value {}", duration);
    if duration > 0 {
        prog.state = ProgramState::Sleeping;
        prog.sleep_left = Duration::from_secs(duration as u64);
    } else {
        prog.warn_at(
            pos,
            "negative parameter given to SLEEP instruction; nothing will happen",
        );
    }
}

/// The exact output line for `PRINT "lit" v1 v2 …`.
///
/// One space before the literal, one after it, and one after every value;
/// an empty literal leaves two spaces between "says:" and the first value.
fn format_print_line(id: i32, lit: &str, values: &[i32]) -> String {
    let mut line = format!("Program {id} says: {lit} ");
    for v in values {
        let _ = write!(line, "{v} ");
    }
    line
}

fn print_handler(prog: &mut Program) {
    let Some(str_tok) = prog.stream.pop() else { return };
    let TokenKind::Str(lit) = str_tok.kind else {
        return;
    };

    let mut values = Vec::new();
    while let Some(tok) = prog.stream.pop() {
        let Some(v) = token_get(prog, &tok) else {
            break;
        };
        values.push(v);
    }

    diag::print_line(&format_print_line(prog.id(), &lit, &values));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::{self, GlobalTable};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn program_from(contents: &str, args: &[i32]) -> (NamedTempFile, Program) {
        let mut f = NamedTempFile::new().expect("create temp source");
        f.write_all(contents.as_bytes()).expect("write temp source");
        let prog = Program::new(f.path(), args).expect("open program");
        (f, prog)
    }

    /// Drive a program until it finishes, sleeps, or blocks.
    fn run(prog: &mut Program, globals: &GlobalTable) {
        for _ in 0..10_000 {
            match prog.state() {
                ProgramState::MagicLine | ProgramState::InstructionLine | ProgramState::LastLine => {
                    interpret_next_line(prog, globals)
                }
                _ => return,
            }
        }
        panic!("program did not settle within 10000 lines");
    }

    fn scalar(prog: &Program, name: &str) -> i32 {
        match prog.locals.get(name) {
            Some(LocalEntry::Array(a)) if a.len() == 1 => a[0],
            other => panic!("expected scalar {name}, found {other:?}"),
        }
    }

    fn array(prog: &Program, name: &str) -> Vec<i32> {
        match prog.locals.get(name) {
            Some(LocalEntry::Array(a)) => a.clone(),
            other => panic!("expected array {name}, found {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_scenario() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSET $x 5\nADD $y $x 3\nPRINT \"y=\" $y\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Finished);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "x"), 5);
        assert_eq!(scalar(&prog, "y"), 8);
    }

    #[test]
    fn test_all_primitive_ops() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSUB $a 10 4\nMUL $b 6 7\nDIV $c 17 5\nMOD $d 17 5\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "a"), 6);
        assert_eq!(scalar(&prog, "b"), 42);
        assert_eq!(scalar(&prog, "c"), 3);
        assert_eq!(scalar(&prog, "d"), 2);
    }

    #[test]
    fn test_division_by_zero_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nDIV $a 1 0\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_forward_branch_scenario() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nBRA L1\nSET $skipped 1\nL1 SET $reached 1\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "reached"), 1);
        assert!(!prog.locals.contains_key("skipped"));
    }

    #[test]
    fn test_backward_branch_loop() {
        // Counts down from 3; the label has been seen by the time the
        // branch resolves backward.
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSET $n 3\nL2 SUB $n $n 1\nADD $steps $steps 1\nBRGT $n 0 L2\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "n"), 0);
        assert_eq!(scalar(&prog, "steps"), 3);
    }

    #[test]
    fn test_conditional_branch_not_taken() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nBRLT 5 3 L1\nSET $fell 1\nL1 RETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "fell"), 1);
    }

    #[test]
    fn test_undefined_label_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nBRA L9\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_branch_to_variable_name_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $Lx 1\nBRA Lx\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_label_redefinition_halts() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nL1 SET $a 1\nL1 SET $b 2\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_argv_scenario() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSET $a $argc\nSET $b $argv[0]\nSET $c $argv[1]\nRETURN\n",
            &[42, 17],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "a"), 2);
        assert_eq!(scalar(&prog, "b"), 42);
        assert_eq!(scalar(&prog, "c"), 17);
    }

    #[test]
    fn test_argv_out_of_range_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $a $argv[$argc]\nRETURN\n", &[7]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_writing_argc_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $argc 5\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_writing_argv_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $argv[0] 5\nRETURN\n", &[1]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_array_growth_scenario() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $a[5] 99\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(array(&prog, "a"), vec![0, 0, 0, 0, 0, 99]);
    }

    #[test]
    fn test_array_read_grows_with_zeroes() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $b $a[3]\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "b"), 0);
        assert_eq!(array(&prog, "a").len(), 4);
    }

    #[test]
    fn test_computed_negative_index_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $i -1\nSET $a[$i] 5\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_array_used_as_scalar_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nSET $a[1] 5\nSET $b $a\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_nested_array_index() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSET $i 2\nSET $a[$i] 7\nSET $b $a[$a[0]]\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(array(&prog, "a"), vec![0, 0, 7]);
        // $a[0] is 0, so $b = $a[0] = 0.
        assert_eq!(scalar(&prog, "b"), 0);
    }

    #[test]
    fn test_variable_shadowing_label_halts() {
        let (_f, mut prog) = program_from("#PROGRAM\nL1 SET $a 1\nSET $L1 2\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_store_load_round_trip() {
        let (_f, mut prog) = program_from(
            "#PROGRAM\nSTORE $g 123\nLOAD $x $g\nSTORE $h[4] 55\nLOAD $y $h[4]\nRETURN\n",
            &[],
        );
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "x"), 123);
        assert_eq!(scalar(&prog, "y"), 55);
        assert_eq!(globals.peek("g", 0), Some(123));
        assert_eq!(globals.peek("h", 4), Some(55));
    }

    #[test]
    fn test_load_from_fresh_global_is_default() {
        let (_f, mut prog) = program_from("#PROGRAM\nLOAD $x $fresh\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "x"), global::initial_count());
    }

    #[test]
    fn test_load_rejects_literal_global() {
        let (_f, mut prog) = program_from("#PROGRAM\nLOAD $x 5\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert!(prog.error_flag());
    }

    #[test]
    fn test_down_blocks_and_up_releases() {
        let (_f, mut prog) = program_from("#PROGRAM\nDOWN $sem\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Blocked);
        assert!(prog.blocked_on.is_some());

        globals.up("sem", 0);
        global::blocked_tick(&mut prog, Duration::from_millis(1));
        assert_eq!(prog.state(), ProgramState::InstructionLine);
        assert_eq!(globals.peek("sem", 0), Some(global::initial_count()));
    }

    #[test]
    fn test_up_then_down_does_not_block() {
        let (_f, mut prog) = program_from("#PROGRAM\nUP $sem\nDOWN $sem\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Blocked);

        // The counter is already positive: one tick takes it without
        // waiting and restores the pre-UP value.
        global::blocked_tick(&mut prog, Duration::ZERO);
        assert_eq!(prog.state(), ProgramState::InstructionLine);
        assert_eq!(globals.peek("sem", 0), Some(global::initial_count()));

        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Finished);
        assert!(!prog.error_flag());
    }

    #[test]
    fn test_sleep_sets_state_and_remainder() {
        let (_f, mut prog) = program_from("#PROGRAM\nSLEEP 2\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Sleeping);
        assert_eq!(prog.sleep_left, Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_nonpositive_is_a_warning_noop() {
        let (_f, mut prog) = program_from("#PROGRAM\nSLEEP -1\nSET $after 1\nRETURN\n", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Finished);
        assert!(!prog.error_flag());
        assert_eq!(scalar(&prog, "after"), 1);
    }

    #[test]
    fn test_empty_file_finishes_without_error() {
        let (_f, mut prog) = program_from("", &[]);
        let globals = GlobalTable::new();
        run(&mut prog, &globals);
        assert_eq!(prog.state(), ProgramState::Finished);
        assert!(!prog.error_flag());
    }

    #[test]
    fn test_format_print_line() {
        assert_eq!(format_print_line(3, "y=", &[8]), "Program 3 says: y= 8 ");
        assert_eq!(
            format_print_line(1, "a b", &[1, -2, 3]),
            "Program 1 says: a b 1 -2 3 "
        );
        // An empty literal leaves two spaces after "says:".
        assert_eq!(format_print_line(2, "", &[5]), "Program 2 says:  5 ");
        assert_eq!(format_print_line(4, "done", &[]), "Program 4 says: done ");
    }
}
