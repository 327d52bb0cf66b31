//! Change-triggered dispatch engine for tripwire.
//!
//! A [`Scheduler`] ticks one timer per trigger job. Each tick asks the job's
//! [`ChangeDetector`](tripwire_core::ports::ChangeDetector) for the feed's
//! current signature, compares it with the one in the [`SignatureStore`],
//! and on change lets the [`Dispatcher`] fan out task messages.

pub mod dispatcher;
pub mod engine;
pub mod jobs;
pub mod queue_admin;
pub mod rotating;
pub mod scheduler;
pub mod signature;
pub mod status;

pub use dispatcher::Dispatcher;
pub use engine::{EngineSettings, TriggerEngine};
pub use queue_admin::{QueueAdmin, QueueReport};
pub use rotating::DailyRotatingLog;
pub use scheduler::{Invocation, ScheduledJob, Scheduler};
pub use signature::{ChangeResult, SignatureStore};
pub use status::FileStatusRecorder;
