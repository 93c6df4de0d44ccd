//! The translated line
//!
//! A small FIFO of tokens for the line currently being executed. The
//! scanner finishes writing before the interpreter starts reading, and a
//! stream is owned by exactly one program, so no synchronization is
//! involved.

use crate::token::Token;
use std::collections::VecDeque;

/// Initial capacity; the queue grows on demand for long PRINT lines.
const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug, Default)]
pub struct TokenStream {
    tokens: VecDeque<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        TokenStream {
            tokens: VecDeque::with_capacity(DEFAULT_CAPACITY),
        }
    }

    pub fn push(&mut self, tok: Token) {
        self.tokens.push_back(tok);
    }

    /// Remove and return the oldest token, or `None` when the line is
    /// exhausted.
    pub fn pop(&mut self) -> Option<Token> {
        self.tokens.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}
