//! CLI command definitions
//!
//! Defines the clap commands for the certverify CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::cluster::ResourceKind;
use crate::report::Verdict;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenario files against the current cluster
    Run {
        /// Paths to YAML scenario files
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Stop at the first scenario that fails
        #[arg(long)]
        fail_fast: bool,

        /// Overall time limit in seconds; the running scenario is torn down when it expires
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Evaluate the ledgers of a finished run
    Evaluate {
        /// Directory holding the run's ledgers
        #[arg(long)]
        dir: PathBuf,

        /// Test identifier to look up
        #[arg(long)]
        test_plan: String,

        /// Fail unless the verdict matches (passed, failed, skipped, error)
        #[arg(long)]
        expect: Option<Verdict>,
    },

    /// Wait for a resource to satisfy its kind's readiness condition
    Wait {
        /// Resource kind (pod, deployment, daemonset)
        kind: ResourceKind,

        /// Resource name
        name: String,

        /// Namespace of the resource
        #[arg(long, short)]
        namespace: Option<String>,

        /// Timeout in seconds (default: [timeouts].ready_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete namespaces and wait until they are gone
    Cleanup {
        /// Namespaces to delete
        #[arg(required = true)]
        namespaces: Vec<String>,

        /// Timeout in seconds for each namespace (default: [timeouts].teardown_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },
}
