//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the dispatch engine and its
//! external collaborators: the message broker, the build history service,
//! the status artifact store, and the two change-detection strategies.

use crate::ids::RunId;
use crate::job::{BuildInfo, DetectionMode, TaskMessage};
use crate::status::StatusRecord;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;

/// Stream of messages received from a topic.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage>> + Send>>;

/// Acknowledgement handle for one received message.
#[async_trait]
pub trait Acknowledge: Send {
    /// Tell the broker the message was handled so it is not redelivered.
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A message received from the broker together with its ack handle.
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub acker: Box<dyn Acknowledge>,
}

impl InboundMessage {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self { payload, acker }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Topic-scoped work queues consumed by worker agents.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Whether the queue behind `topic` currently exists.
    async fn queue_exists(&self, topic: &str) -> Result<bool>;

    /// Delete and recreate the queue behind `topic`, dropping stuck consumers.
    async fn recreate_queue(&self, topic: &str) -> Result<()>;

    /// Publish one task message to its topic.
    async fn publish(&self, message: &TaskMessage) -> Result<()>;

    /// Receive messages sent to `topic`.
    async fn listen(&self, topic: &str) -> Result<InboundStream>;
}

/// Build history lookup, keyed by an ordered timestamp string.
#[async_trait]
pub trait BuildHistory: Send + Sync {
    /// Current timestamp -> build mapping for a platform.
    async fn history(&self, platform: &str) -> Result<BTreeMap<String, BuildInfo>>;

    /// Rebuild the mapping for a platform over the last `days` days.
    async fn refresh(&self, platform: &str, days: u32, suite_white_list: &[String]) -> Result<()>;
}

/// Append-only store for dispatch lifecycle records.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Allocate a run id for a new dispatch of `job_name`.
    async fn start_run(&self, job_name: &str) -> Result<RunId>;

    /// Append one record to its run.
    async fn append(&self, record: &StatusRecord) -> Result<()>;
}

/// What a detector saw on the feed this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Value persisted and compared between ticks.
    pub signature: String,
    /// Provenance of the newest build, when the detector knows it.
    pub build: Option<BuildInfo>,
}

/// One way of answering "has this platform's feed changed".
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    fn mode(&self) -> DetectionMode;

    /// Fetch the current signature for a platform.
    async fn observe(&self, platform: &str) -> Result<Observation>;
}
