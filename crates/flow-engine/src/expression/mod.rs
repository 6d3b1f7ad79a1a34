//! Path/condition evaluation (§4.A) and template expansion (§4.B).
//!
//! Deliberately narrower than a full expression language: literals, dotted
//! paths, and the six comparison operators. Scoped template placeholders
//! (`$input`, `$org`, `$project`, `$personal`) are resolved by the caller via
//! [`ScopeResolver`] rather than hard-wired into the evaluator, since those
//! scopes are owned by the execution context, not the evaluator.

pub mod path_condition;
pub mod template;

pub use path_condition::*;
pub use template::*;

use thiserror::Error;

pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("not an object: {0}")]
    NotAnObject(String),
}
