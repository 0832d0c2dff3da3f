//! # shift-core
//!
//! Core crate for the Shift background job system. Contains the unified
//! error type, configuration schemas, typed identifiers, pagination types,
//! and the traits other crates implement (cache backends, parameter
//! ciphers).
//!
//! This crate has **no** internal dependencies on other Shift crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
