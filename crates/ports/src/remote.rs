//! Remote execution boundary contract (SSH fan-out).

use crate::BoxFuture;
use ringvault_shared::{RequestContext, Result};

/// Observed state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The command has not reported an exit status yet.
    Running,
    /// The command exited with status zero.
    Finished,
    /// The command exited with a non-zero status.
    Broken {
        /// Remote exit code.
        exit_code: i32,
    },
}

/// A command started on one target host.
///
/// Implementations keep the underlying transport alive across polls,
/// reconnect when it dies, and re-attach to the supervisor wrapper in
/// the job directory (the wrapper is idempotent and single-instance
/// per directory).
pub trait RemoteHandle: Send + Sync {
    /// Target host of this job.
    fn host(&self) -> &str;

    /// Poll the job once. Still-running jobs receive a keep-alive;
    /// dead transports are reopened before the next poll.
    fn poll(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<RemoteStatus>>;

    /// Fetch the remote stderr capture from the job directory.
    fn fetch_stderr(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<String>>;
}

/// Boundary contract for executing commands on cluster hosts.
pub trait RemoteExecPort: Send + Sync {
    /// Run a command to completion, returning its exit code.
    fn run(
        &self,
        ctx: &RequestContext,
        host: String,
        command: String,
    ) -> BoxFuture<'_, Result<i32>>;

    /// Start a long-running command under the supervisor wrapper in a
    /// per-job working directory.
    fn start_supervised(
        &self,
        ctx: &RequestContext,
        host: String,
        job_dir: String,
        command: String,
    ) -> BoxFuture<'_, Result<Box<dyn RemoteHandle>>>;
}
