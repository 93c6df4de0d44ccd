//! Size limits shared by the scanner and the shell.

/// Longest PRINT string literal, in bytes.
pub const MAX_INPUT_STR_LEN: usize = 1023;

/// Longest symbol (variable name, label, instruction word), in bytes.
/// Always less than [`MAX_INPUT_STR_LEN`].
pub const MAX_SYMBOL_LEN: usize = 127;

/// Most digits an integer literal may carry, leading sign excluded.
/// Eight decimal digits always fit an `i32`.
pub const MAX_INT_DIGITS: usize = 8;
