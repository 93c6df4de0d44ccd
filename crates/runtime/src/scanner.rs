//! Lazy line scanner
//!
//! Reads one logical line at a time from a program's source file and
//! translates it into tokens on the program's stream. The scanner keeps
//! exactly one character of lookahead in `Program::c` and a
//! `(line, column, prev_col)` cursor; backward branches are a plain file
//! seek plus a cursor restore, so no line is ever buffered twice.

use crate::program::{LabelRecord, Program, ProgramState};
use simbly_core::diag;
use simbly_core::limits::{MAX_INPUT_STR_LEN, MAX_INT_DIGITS, MAX_SYMBOL_LEN};
use simbly_core::token::{Opcode, Token, TokenKind, VarVal};
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

const MAGIC_BYTES: &[u8] = b"#PROGRAM";

/// How a line ended after the last expected token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    Clean,
    Eof,
    NotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelCheck {
    NotLabel,
    Label,
    /// Looked like a label but violated the grammar; already reported.
    Invalid,
}

fn starts_like_number(word: &str) -> bool {
    word.as_bytes()
        .first()
        .is_some_and(|b| *b == b'-' || b.is_ascii_digit())
}

fn count_word(n: usize) -> &'static str {
    match n {
        1 => "one",
        2 => "two",
        _ => "three",
    }
}

impl Program {
    /// Advance the lookahead by one byte, maintaining the cursor.
    pub(crate) fn next_char(&mut self) {
        let mut buf = [0u8; 1];
        match self.file.read(&mut buf) {
            Ok(0) => {
                self.c = None;
                self.column += 1;
            }
            Ok(_) => {
                let b = buf[0];
                if b == b'\n' {
                    self.prev_col = self.column;
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                self.c = Some(b);
            }
            Err(e) => diag::fatal("reading program source", &e),
        }
    }

    /// Skip whitespace; false once EOF is consumed.
    fn flush_to_char(&mut self) -> bool {
        loop {
            self.next_char();
            match self.c {
                None => return false,
                Some(b) if !b.is_ascii_whitespace() => return true,
                _ => {}
            }
        }
    }

    /// Only whitespace may remain before the newline.
    fn flush_to_newline(&mut self) -> LineEnd {
        while self.c != Some(b'\n') {
            self.next_char();
            match self.c {
                None => return LineEnd::Eof,
                Some(b) if !b.is_ascii_whitespace() => return LineEnd::NotEmpty,
                _ => {}
            }
        }
        LineEnd::Clean
    }

    /// Assemble the next whitespace-delimited word.
    ///
    /// Returns `None` at EOF, or (with `same_line`) once the current line
    /// has been crossed. A word longer than `max_len` halts the program.
    /// Hitting EOF right after a word marks the program `LastLine`.
    fn get_next_word(&mut self, max_len: usize, same_line: bool) -> Option<String> {
        let start_line = self.line;
        let mut ch = self.c?;

        if same_line && ch == b'\n' {
            return None;
        }
        if ch.is_ascii_whitespace() {
            if !self.flush_to_char() {
                return None;
            }
            ch = self.c.expect("flush_to_char leaves a character in the lookahead");
        }
        if same_line && start_line != self.line {
            return None;
        }

        let mut word = String::with_capacity(16);
        word.push(ch as char);

        loop {
            self.next_char();
            match self.c {
                None => {
                    self.state = ProgramState::LastLine;
                    break;
                }
                Some(b) if b.is_ascii_whitespace() => break,
                Some(b) => {
                    if word.len() == max_len {
                        self.error_here(&format!(
                            "symbol too big to parse; maximum symbol name length allowed is {max_len}\n\t{word}...\n\t^"
                        ));
                        return None;
                    }
                    word.push(b as char);
                }
            }
        }

        debug!("read word {} with length {}", word, word.len());
        Some(word)
    }

    fn push_token(&mut self, kind: TokenKind) {
        let pos = self.pos();
        self.stream.push(Token { kind, pos });
    }

    /// Emit a label token carrying the file position just past the label
    /// word (the delimiter already sits in the lookahead).
    fn push_label_token(&mut self, name: &str) {
        let offset = match self.file.stream_position() {
            Ok(o) => o,
            Err(e) => diag::fatal("querying program source position", &e),
        };
        debug!("new label {} token recognized", name);
        self.push_token(TokenKind::Label {
            name: name.to_string(),
            offset,
        });
    }

    /// Classify a line-leading word against the label grammar: starts
    /// with `L`, at least two characters, alphanumeric, and not the
    /// spelling `LOAD`.
    fn check_label(&mut self, word: &str) -> LabelCheck {
        if !word.starts_with('L') || word == "LOAD" {
            return LabelCheck::NotLabel;
        }
        if word.len() == 1 {
            self.error_here("invalid label name");
            return LabelCheck::Invalid;
        }
        for ch in word[1..].chars() {
            if !ch.is_ascii_alphanumeric() {
                self.error_here("label names can only have alphanumeric characters");
                return LabelCheck::Invalid;
            }
        }
        LabelCheck::Label
    }

    /// Consume the magic first line.
    ///
    /// EOF anywhere on the magic line finishes the program quietly (an
    /// empty file is legal); wrong bytes or trailing non-whitespace are
    /// errors.
    pub(crate) fn parse_magic(&mut self) {
        let mut read = [0u8; MAGIC_BYTES.len()];
        for slot in read.iter_mut() {
            self.next_char();
            let Some(b) = self.c else {
                self.stop(false);
                return;
            };
            *slot = b;
        }

        // The character after the magic bytes.
        self.next_char();
        if self.c.is_none() {
            self.stop(false);
            return;
        }

        if read != *MAGIC_BYTES {
            self.error_here(&format!(
                "not a valid simbly program; valid simbly programs begin with the magic bytes \"{}\"",
                String::from_utf8_lossy(MAGIC_BYTES)
            ));
            return;
        }

        match self.c {
            Some(b'\n') => self.state = ProgramState::InstructionLine,
            Some(b) if b.is_ascii_whitespace() => {
                let magic_line = self.line;
                let more = self.flush_to_char();
                if magic_line == self.line {
                    self.error_here(
                        "unexpected character encountered in the same line as the magic bytes",
                    );
                } else if !more {
                    self.state = ProgramState::Finished;
                } else {
                    self.state = ProgramState::InstructionLine;
                }
            }
            _ => self.error_here(
                "unexpected character encountered in the same line as the magic bytes",
            ),
        }
    }

    /// Translate the next source line onto the token stream.
    ///
    /// Reads an optional label and an instruction word, then hands the
    /// rest of the line to the instruction's operand parser. Leaves the
    /// stream empty at EOF.
    pub(crate) fn tokenize_next_line(&mut self) {
        let Some(first) = self.get_next_word(MAX_SYMBOL_LEN, false) else {
            return;
        };

        let word = match self.check_label(&first) {
            LabelCheck::Invalid => return,
            LabelCheck::NotLabel => first,
            LabelCheck::Label => {
                self.push_label_token(&first);
                match self.get_next_word(MAX_SYMBOL_LEN, true) {
                    Some(next) => next,
                    None => {
                        if !self.error_flag {
                            self.error_here("line with label should be followed by instruction");
                        }
                        return;
                    }
                }
            }
        };

        if self.state == ProgramState::Finished {
            return;
        }

        match Opcode::from_name(&word) {
            Some(op) => {
                debug!("new instruction {} token recognized", word);
                self.push_token(TokenKind::Instruction(op));
                self.parse_operands(op);
            }
            None => {
                self.error_here(&format!("unrecognized instruction\n\t{word}\n\t^"));
            }
        }
    }

    fn parse_operands(&mut self, op: Opcode) {
        match op {
            Opcode::Load | Opcode::Store | Opcode::Set => self.parse_fixed_operands(op, 2),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.parse_fixed_operands(op, 3)
            }
            Opcode::Brgt | Opcode::Brge | Opcode::Brlt | Opcode::Brle | Opcode::Breq => {
                self.parse_branch(op, true)
            }
            Opcode::Bra => self.parse_branch(op, false),
            Opcode::Down | Opcode::Up => self.parse_semaphore(op),
            Opcode::Sleep => self.parse_sleep(op),
            Opcode::Print => self.parse_print(),
            Opcode::Return => {}
        }
    }

    fn expect_line_end(&mut self, op: Opcode) {
        if self.flush_to_newline() == LineEnd::NotEmpty {
            self.error_here(&format!(
                "more arguments than expected, after {} instruction",
                op.name()
            ));
        }
    }

    /// `n` VarVal operands on the current line; the first must be a
    /// variable reference, not a literal.
    fn parse_fixed_operands(&mut self, op: Opcode, n: usize) {
        for i in 0..n {
            let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) else {
                if !self.error_flag {
                    self.error_here(&format!(
                        "{} instruction expects {} arguments",
                        op.name(),
                        count_word(n)
                    ));
                }
                return;
            };
            if i == 0 && starts_like_number(&word) {
                self.error_here(&format!(
                    "{} instruction expects a variable name as its first argument",
                    op.name()
                ));
                return;
            }
            let Some(vv) = self.parse_varval(&word) else {
                return;
            };
            self.push_token(TokenKind::Operand(vv));
        }
        self.expect_line_end(op);
    }

    fn parse_branch(&mut self, op: Opcode, conditional: bool) {
        if conditional {
            for _ in 0..2 {
                let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) else {
                    if !self.error_flag {
                        self.error_here(&format!(
                            "{} instruction expects two arguments",
                            op.name()
                        ));
                    }
                    return;
                };
                let Some(vv) = self.parse_varval(&word) else {
                    return;
                };
                self.push_token(TokenKind::Operand(vv));
            }
        }

        let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) else {
            if !self.error_flag {
                self.error_here(&format!(
                    "{} instruction expects a label as its last argument",
                    op.name()
                ));
            }
            return;
        };

        match self.check_label(&word) {
            LabelCheck::Label => {
                self.push_label_token(&word);
                if self.expect_line_end_ok(op) {
                    // The target may sit earlier in the file; a branch on
                    // the final line must stay runnable after the seek.
                    if self.c.is_none() || self.state == ProgramState::LastLine {
                        self.state = ProgramState::InstructionLine;
                    }
                }
            }
            LabelCheck::Invalid => {}
            LabelCheck::NotLabel => {
                self.error_here(&format!(
                    "{} instruction expects a label as its last argument",
                    op.name()
                ));
            }
        }
    }

    fn expect_line_end_ok(&mut self, op: Opcode) -> bool {
        if self.flush_to_newline() == LineEnd::NotEmpty {
            self.error_here(&format!(
                "more arguments than expected, after {} instruction",
                op.name()
            ));
            return false;
        }
        true
    }

    fn parse_semaphore(&mut self, op: Opcode) {
        let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) else {
            if !self.error_flag {
                self.error_here(&format!("{} instruction expects one argument", op.name()));
            }
            return;
        };
        if starts_like_number(&word) {
            self.error_here(&format!(
                "{} instruction expects a global variable as its argument",
                op.name()
            ));
            return;
        }
        let Some(vv) = self.parse_varval(&word) else {
            return;
        };
        self.push_token(TokenKind::Operand(vv));
        self.expect_line_end(op);
    }

    fn parse_sleep(&mut self, op: Opcode) {
        let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) else {
            if !self.error_flag {
                self.error_here(&format!("{} instruction expects one argument", op.name()));
            }
            return;
        };
        let Some(vv) = self.parse_varval(&word) else {
            return;
        };
        self.push_token(TokenKind::Operand(vv));
        self.expect_line_end(op);
    }

    /// A `"`-delimited string of printable ASCII, then zero or more
    /// VarVal arguments on the same line.
    fn parse_print(&mut self) {
        if !self.flush_to_char() || self.c != Some(b'"') {
            self.error_here(
                "PRINT instruction must be followed by a string and 0 or more arguments",
            );
            return;
        }

        let string_line = self.line;
        let mut s = String::new();
        loop {
            self.next_char();
            let Some(b) = self.c else {
                self.error_here(&format!(
                    "unexpected EOF encountered while parsing string\n\t{s}\n\t^"
                ));
                return;
            };
            if s.len() >= MAX_INPUT_STR_LEN {
                self.error_here(&format!(
                    "string too big to parse; maximum string length allowed is {MAX_INPUT_STR_LEN}\n\t{s}...\n\t^"
                ));
                return;
            }
            if !(0x20..=0x7e).contains(&b) {
                self.error_here(&format!(
                    "non-printable character with ascii code {b} encountered while parsing string\n\t{s}\n\t^"
                ));
                return;
            }
            if b == b'"' {
                break;
            }
            s.push(b as char);
        }
        debug!("parsed string \"{}\"", s);

        self.next_char();
        let Some(b) = self.c else {
            self.error_here("unexpected EOF encountered while parsing PRINT instruction");
            return;
        };
        if !b.is_ascii_whitespace() {
            self.error_here("strings must be followed by whitespace");
            return;
        }
        self.push_token(TokenKind::Str(s));

        if !self.flush_to_char() || self.line != string_line {
            if self.c.is_none() {
                self.state = ProgramState::LastLine;
            }
            return;
        }

        while let Some(word) = self.get_next_word(MAX_SYMBOL_LEN, true) {
            debug!("parsed {} in the same line as PRINT", word);
            let Some(vv) = self.parse_varval(&word) else {
                break;
            };
            self.push_token(TokenKind::Operand(vv));
        }
    }

    /// Recognize one VarVal shape in a word: an integer literal, `$name`,
    /// or `$name[VarVal]` with arbitrary nesting.
    pub(crate) fn parse_varval(&mut self, word: &str) -> Option<VarVal> {
        let bytes = word.as_bytes();
        let mut pos = 0usize;
        let vv = self.parse_varval_at(bytes, &mut pos, false)?;
        if pos != bytes.len() {
            self.error_here(&format!(
                "unrecognized string isn't variable or integer value\n\t{}\n\t^",
                &word[pos..]
            ));
            return None;
        }
        Some(vv)
    }

    fn parse_varval_at(&mut self, bytes: &[u8], pos: &mut usize, in_index: bool) -> Option<VarVal> {
        match bytes.get(*pos).copied() {
            Some(b'$') => {
                let name_start = *pos + 1;
                if !bytes
                    .get(name_start)
                    .is_some_and(|b| b.is_ascii_alphabetic())
                {
                    self.error_here(
                        "variable names always begin with a letter, followed by alphanumeric characters",
                    );
                    return None;
                }
                let mut i = name_start + 1;
                loop {
                    match bytes.get(i).copied() {
                        None | Some(b'[') => break,
                        Some(b']') if in_index => break,
                        Some(b) if b.is_ascii_alphanumeric() => {
                            if i - name_start >= MAX_SYMBOL_LEN {
                                self.error_here(&format!(
                                    "symbol exceeds maximum length of allowed symbol names: {MAX_SYMBOL_LEN}"
                                ));
                                return None;
                            }
                            i += 1;
                        }
                        Some(_) => {
                            self.error_here(
                                "variable names always begin with a letter, followed by alphanumeric characters",
                            );
                            return None;
                        }
                    }
                }

                let name = String::from_utf8_lossy(&bytes[name_start..i]).into_owned();
                match bytes.get(i).copied() {
                    Some(b'[') => {
                        let mut j = i + 1;
                        let index = self.parse_varval_at(bytes, &mut j, true)?;
                        if bytes.get(j) != Some(&b']') {
                            self.error_here("couldn't parse array index closing brackets");
                            return None;
                        }
                        *pos = j + 1;
                        Some(VarVal::Arr {
                            name,
                            index: Box::new(index),
                        })
                    }
                    Some(b']') if in_index => {
                        *pos = i;
                        Some(VarVal::Var(name))
                    }
                    None if in_index => {
                        self.error_here("couldn't parse array index closing brackets");
                        None
                    }
                    _ => {
                        *pos = i;
                        Some(VarVal::Var(name))
                    }
                }
            }
            Some(b) if b == b'-' || b.is_ascii_digit() => {
                if in_index && b == b'-' {
                    self.error_here("invalid symbol detected inside array index brackets");
                    return None;
                }
                let num_start = *pos;
                let mut i = *pos + 1;
                loop {
                    match bytes.get(i).copied() {
                        None => break,
                        Some(b']') if in_index => break,
                        Some(d) if d.is_ascii_digit() => i += 1,
                        Some(_) => {
                            self.error_here("invalid characters detected while parsing number");
                            return None;
                        }
                    }
                }
                let digits = i - num_start - usize::from(b == b'-');
                if digits == 0 {
                    self.error_here("invalid characters detected while parsing number");
                    return None;
                }
                if digits > MAX_INT_DIGITS {
                    self.error_here(&format!(
                        "integer exceeds maximum number of digits: {MAX_INT_DIGITS}"
                    ));
                    return None;
                }
                let text = std::str::from_utf8(&bytes[num_start..i])
                    .expect("digit characters are valid UTF-8");
                let value: i32 = text
                    .parse()
                    .expect("eight decimal digits always fit an i32");
                *pos = i;
                Some(VarVal::Value(value))
            }
            _ => {
                let rest = String::from_utf8_lossy(&bytes[*pos..]);
                self.error_here(&format!(
                    "unrecognized string isn't variable or integer value\n\t{rest}\n\t^"
                ));
                None
            }
        }
    }

    /// Jump the scanner to a recorded label position.
    pub(crate) fn seek_to_label(&mut self, rec: &LabelRecord) {
        if let Err(e) = self.file.seek(SeekFrom::Start(rec.offset)) {
            diag::fatal("seeking program source", &e);
        }
        self.line = rec.line;
        self.column = rec.column;
        self.prev_col = rec.prev_col;
        self.c = Some(b' ');
        // A stale LastLine refers to the position before the seek.
        if self.state == ProgramState::LastLine {
            self.state = ProgramState::InstructionLine;
        }
    }
}
