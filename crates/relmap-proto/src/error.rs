//! Criteria parse errors.

use thiserror::Error;

/// Errors raised while parsing a criteria value.
#[derive(Debug, Error)]
pub enum Error {
    /// The criteria shape violates the grammar.
    #[error("malformed criteria: {0}")]
    Malformed(String),

    /// A reserved `@` key that the grammar does not define.
    #[error("unknown criteria directive: {0}")]
    UnknownDirective(String),
}
