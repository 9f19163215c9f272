//! Bulk campaign dispatch: partitions prepared emails by sending account,
//! runs one throttled worker per account and aggregates the outcomes.

#![warn(clippy::unwrap_used)]

pub mod control;
pub mod coordinator;
pub mod partition;
pub mod rate;
pub mod reporter;
pub mod scheduler;
pub mod test_email;
pub mod worker;

pub use control::DispatchControl;
pub use coordinator::Dispatcher;
pub use partition::{partition, AccountBucket};
pub use rate::{DelaySchedule, RateLimiter};
pub use reporter::ProgressReporter;
pub use scheduler::{RecordingScheduler, Scheduler, TokioScheduler};
pub use test_email::TestEmailTrigger;
pub use worker::{AccountWorker, WorkerEvent, CANCELLED_ERROR};
