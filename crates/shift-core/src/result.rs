//! Shorthand result type.

use crate::error::AppError;

/// `Result` with [`AppError`].
pub type AppResult<T> = Result<T, AppError>;
