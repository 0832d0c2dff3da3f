//! Background job domain entities.

pub mod invoke;
pub mod model;
pub mod progress;
pub mod status;

pub use invoke::InvokeMeta;
pub use model::{Job, NewJob};
pub use progress::{CachedProgress, JobProgress, JobStatusCount, JobView, ProgressInfo};
pub use status::{JobCommand, JobStatus};
