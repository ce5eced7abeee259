//! SSH remote execution adapter over `ssh2`.
//!
//! One session per target host. Long-running restore commands run
//! under the `ringvault-wrapper` supervisor inside a per-job work
//! directory; the wrapper captures stdout/stderr, records the exit
//! status, and is idempotent, so re-executing it after a transport
//! drop re-attaches to the already-running command instead of starting
//! a second one.

use ringvault_ports::{BoxFuture, RemoteExecPort, RemoteHandle, RemoteStatus};
use ringvault_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SSH_PORT: u16 = 22;

/// Credentials for the SSH fan-out.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    /// Remote user name.
    pub username: String,
    /// Private key file.
    pub key_file: PathBuf,
}

/// `ssh2`-backed remote executor.
#[derive(Debug, Clone)]
pub struct Ssh2Remote {
    credentials: Arc<SshCredentials>,
}

impl Ssh2Remote {
    /// Create an executor with the given credentials.
    #[must_use]
    pub fn new(credentials: SshCredentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }
}

fn connect(credentials: &SshCredentials, host: &str) -> Result<Session> {
    let stream = TcpStream::connect((host, SSH_PORT))
        .map_err(|error| remote_error(host, &format!("connect failed: {error}")))?;
    let mut session =
        Session::new().map_err(|error| remote_error(host, &format!("session init: {error}")))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|error| remote_error(host, &format!("handshake failed: {error}")))?;
    session
        .userauth_pubkey_file(
            &credentials.username,
            None,
            Path::new(&credentials.key_file),
            None,
        )
        .map_err(|error| remote_error(host, &format!("authentication failed: {error}")))?;
    Ok(session)
}

fn remote_error(host: &str, detail: &str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::remote_exec(),
        format!("[{host}] {detail}"),
        ErrorClass::NonRetriable,
    )
    .with_metadata("host", host.to_owned())
}

fn exec_to_completion(session: &Session, host: &str, command: &str) -> Result<i32> {
    let mut channel = session
        .channel_session()
        .map_err(|error| remote_error(host, &format!("channel open: {error}")))?;
    channel
        .exec(command)
        .map_err(|error| remote_error(host, &format!("exec failed: {error}")))?;
    let mut stdout = String::new();
    let _ = channel.read_to_string(&mut stdout);
    channel
        .wait_close()
        .map_err(|error| remote_error(host, &format!("channel close: {error}")))?;
    channel
        .exit_status()
        .map_err(|error| remote_error(host, &format!("exit status: {error}")))
}

struct JobState {
    session: Session,
    channel: ssh2::Channel,
}

struct SupervisedJobInner {
    credentials: Arc<SshCredentials>,
    host: String,
    job_dir: String,
    wrapped_command: String,
    state: Mutex<Option<JobState>>,
}

impl SupervisedJobInner {
    fn start_channel(&self, session: &Session) -> Result<ssh2::Channel> {
        let mut channel = session
            .channel_session()
            .map_err(|error| remote_error(&self.host, &format!("channel open: {error}")))?;
        channel
            .exec(&self.wrapped_command)
            .map_err(|error| remote_error(&self.host, &format!("exec failed: {error}")))?;
        Ok(channel)
    }

    fn poll_blocking(&self) -> Result<RemoteStatus> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| remote_error(&self.host, "job state poisoned"))?;

        let Some(state) = guard.as_mut() else {
            return Err(remote_error(&self.host, "job was never started"));
        };

        if state.channel.eof() {
            let _ = state.channel.wait_close();
            let exit_code = state
                .channel
                .exit_status()
                .map_err(|error| remote_error(&self.host, &format!("exit status: {error}")))?;
            return Ok(if exit_code == 0 {
                RemoteStatus::Finished
            } else {
                RemoteStatus::Broken { exit_code }
            });
        }

        // An ignored packet both keeps the connection alive and tells
        // us whether the transport is still there.
        if state.session.keepalive_send().is_ok() {
            return Ok(RemoteStatus::Running);
        }

        // Transport died: reopen and re-attach to the wrapper.
        let session = connect(&self.credentials, &self.host)?;
        let channel = self.start_channel(&session)?;
        *guard = Some(JobState { session, channel });
        Ok(RemoteStatus::Running)
    }

    fn fetch_stderr_blocking(&self) -> Result<String> {
        let guard = self
            .state
            .lock()
            .map_err(|_| remote_error(&self.host, "job state poisoned"))?;
        let Some(state) = guard.as_ref() else {
            return Err(remote_error(&self.host, "job was never started"));
        };
        let sftp = state
            .session
            .sftp()
            .map_err(|error| remote_error(&self.host, &format!("sftp open: {error}")))?;
        let path = PathBuf::from(&self.job_dir).join("stderr");
        let mut file = match sftp.open(&path) {
            Ok(file) => file,
            Err(_) => return Ok(String::new()),
        };
        let mut body = String::new();
        let _ = file.read_to_string(&mut body);
        Ok(body)
    }
}

/// A supervised command on one host.
pub struct SupervisedJob {
    inner: Arc<SupervisedJobInner>,
}

impl RemoteHandle for SupervisedJob {
    fn host(&self) -> &str {
        &self.inner.host
    }

    fn poll(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<RemoteStatus>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || inner.poll_blocking())
                .await
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        error.to_string(),
                        ErrorClass::NonRetriable,
                    )
                })?
        })
    }

    fn fetch_stderr(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<String>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || inner.fetch_stderr_blocking())
                .await
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        error.to_string(),
                        ErrorClass::NonRetriable,
                    )
                })?
        })
    }
}

impl RemoteExecPort for Ssh2Remote {
    fn run(
        &self,
        _ctx: &RequestContext,
        host: String,
        command: String,
    ) -> BoxFuture<'_, Result<i32>> {
        let credentials = Arc::clone(&self.credentials);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let session = connect(&credentials, &host)?;
                exec_to_completion(&session, &host, &command)
            })
            .await
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    error.to_string(),
                    ErrorClass::NonRetriable,
                )
            })?
        })
    }

    fn start_supervised(
        &self,
        _ctx: &RequestContext,
        host: String,
        job_dir: String,
        command: String,
    ) -> BoxFuture<'_, Result<Box<dyn RemoteHandle>>> {
        let credentials = Arc::clone(&self.credentials);
        Box::pin(async move {
            let wrapped_command = wrap_command(&job_dir, &command);
            let inner = Arc::new(SupervisedJobInner {
                credentials,
                host,
                job_dir,
                wrapped_command,
                state: Mutex::new(None),
            });
            let inner_for_start = Arc::clone(&inner);
            tokio::task::spawn_blocking(move || {
                let session = connect(&inner_for_start.credentials, &inner_for_start.host)?;
                let channel = inner_for_start.start_channel(&session)?;
                let mut guard = inner_for_start
                    .state
                    .lock()
                    .map_err(|_| remote_error(&inner_for_start.host, "job state poisoned"))?;
                *guard = Some(JobState { session, channel });
                Ok::<(), ErrorEnvelope>(())
            })
            .await
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    error.to_string(),
                    ErrorClass::NonRetriable,
                )
            })??;
            Ok(Box::new(SupervisedJob { inner }) as Box<dyn RemoteHandle>)
        })
    }
}

/// Build the supervised command line for a job directory.
fn wrap_command(job_dir: &str, command: &str) -> String {
    format!("mkdir -p {job_dir} && cd {job_dir} && ringvault-wrapper {command}")
}
