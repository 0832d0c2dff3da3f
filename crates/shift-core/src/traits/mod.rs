//! Core traits defined in `shift-core` and implemented by other crates.

pub mod cache;
pub mod cipher;

pub use cache::CacheProvider;
pub use cipher::{ParameterCipher, PlaintextCipher};
