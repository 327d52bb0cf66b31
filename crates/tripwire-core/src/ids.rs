//! Identifiers for dispatched tasks and status runs.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp layout of a uid prefix, microsecond resolution.
pub const UID_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S%.6f";

/// Timestamp layout appended to a job name to form a run id.
pub const RUN_TIME_FORMAT: &str = "%Y%m%d%H%M%S%6f";

macro_rules! define_string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// File-system safe key of a job name.
///
/// Distinct names always give distinct keys: everything outside
/// `[A-Za-z0-9._~-]` is percent-encoded, `%` included, and a leading dot is
/// encoded so a key is never hidden, `.` or `..`.
pub fn job_key(job_name: &str) -> String {
    let encoded = urlencoding::encode(job_name);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

define_string_id!(Uid);
define_string_id!(RunId);

/// Shared prefix of every uid produced by one fan-out: `"{time}.{job}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidPrefix(String);

impl UidPrefix {
    pub fn new<Tz: TimeZone>(now: &DateTime<Tz>, job_name: &str) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(format!("{}.{}", now.format(UID_TIME_FORMAT), job_name))
    }

    /// The uid at 1-based position `index` within the fan-out.
    pub fn uid(&self, index: u32) -> Uid {
        Uid(format!("{}.{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RunId {
    /// `"{job_key}_{time}"`, usable as a file name.
    pub fn new<Tz: TimeZone>(job_name: &str, now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(format!("{}_{}", job_key(job_name), now.format(RUN_TIME_FORMAT)))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Uid {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}
