//! Core type definitions used across the Shift workspace.

pub mod id;
pub mod pagination;

pub use id::JobId;
pub use pagination::{PageRequest, PageResponse};
