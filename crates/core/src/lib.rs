//! Shared foundation for the Simbly interpreter
//!
//! Leaf types used by every other crate in the workspace: tokens with
//! source positions, the per-line token stream, size limits, and the
//! terminal diagnostics layer.

pub mod diag;
pub mod limits;
pub mod stream;
pub mod token;

pub use stream::TokenStream;
pub use token::{Opcode, SourcePos, Token, TokenKind, VarVal};
