//! Build feed clients for tripwire.
//!
//! [`BuildFeedClient`] reads the nightly archive listing and the build
//! history service; [`HashDetector`] and [`TimestampDetector`] turn those
//! reads into the signatures the scheduler compares between ticks.

pub mod detector;
pub mod feed;
pub mod history;
pub mod platform;

pub use detector::{HashDetector, TimestampDetector};
pub use feed::{ArchiveConfig, BuildFeedClient};
pub use history::HttpBuildHistory;
