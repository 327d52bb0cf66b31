//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use tripwire_core::DetectionMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Reset queues, then watch the feeds and dispatch until Ctrl-C
    Run {
        /// Do not rebuild the build history before the first tick
        #[arg(long)]
        skip_first_query: bool,

        /// Do not recreate the queues of enabled jobs at startup
        #[arg(long)]
        skip_queue_reset: bool,
    },

    /// Delete a job's stored signature so the next check dispatches again
    Reset {
        /// Job name
        job: String,

        /// Which detection mode's record to delete
        #[arg(short, long, value_enum, default_value_t = ResetMode::All)]
        mode: ResetMode,
    },

    /// Check the trigger configuration without connecting anywhere
    Validate,

    /// Print the records of one dispatch run
    Status {
        /// Run id, as written in the status directory
        run_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetMode {
    Hash,
    Timestamp,
    All,
}

impl ResetMode {
    pub fn modes(&self) -> Vec<DetectionMode> {
        match self {
            ResetMode::Hash => vec![DetectionMode::Hash],
            ResetMode::Timestamp => vec![DetectionMode::Timestamp],
            ResetMode::All => DetectionMode::ALL.to_vec(),
        }
    }
}
