//! # shift-entity
//!
//! Domain records for the Shift job system. Every struct in this crate
//! represents a job store row or a value object derived from one. All
//! entities derive `Debug`, `Clone`, `Serialize`, `Deserialize`, and store
//! rows additionally derive `sqlx::FromRow`.

pub mod job;
