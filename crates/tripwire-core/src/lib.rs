//! Tripwire Core
//!
//! Domain types, port traits, and error handling shared by every tripwire
//! crate. Adapters (archive feed, NATS broker, status files) live in their
//! own crates and plug in through [`ports`].

pub mod error;
pub mod ids;
pub mod job;
pub mod masking;
pub mod ports;
pub mod status;

pub use error::{Error, Result};
pub use ids::{RunId, Uid, UidPrefix, job_key};
pub use job::{BuildInfo, DetectionMode, JobDefinition, RawJobConfig, TaskMessage};
pub use status::{Phase, StatusContent, StatusRecord};
