//! Concrete PostgreSQL repositories.

pub mod job;

pub use job::JobRepository;
