//! Scripted port doubles for Cassandra, remote execution, and prompts.

use ringvault_domain::TokenMap;
use ringvault_ports::{
    BoxFuture, CassandraPort, HealthCheck, PromptPort, RemoteExecPort, RemoteHandle, RemoteStatus,
    SnapshotDir,
};
use ringvault_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Recorded node start invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Started with tokens read from `system.local`.
    Implicit,
    /// Started with explicit initial tokens.
    WithTokens(Vec<String>),
}

/// A scripted Cassandra node over a real temp directory tree.
///
/// `create_snapshot` copies the live files of every table directory
/// into `snapshots/<tag>/`, mimicking the hard links a real node
/// creates.
pub struct FakeCassandra {
    /// Fqdn this fake answers to.
    pub fqdn: String,
    /// Data root (temp directory in tests).
    pub data_root: PathBuf,
    /// Commitlog directory.
    pub commitlog: PathBuf,
    /// Saved-caches directory.
    pub saved_caches: PathBuf,
    /// Schema dump returned to the engine.
    pub schema: String,
    /// Tokenmap returned to the engine.
    pub tokenmap: TokenMap,
    /// Hosts reported as up by health checks.
    pub up_hosts: Mutex<BTreeSet<String>>,
    /// Snapshot tags created so far.
    pub created_snapshots: Mutex<Vec<String>>,
    /// Snapshot tags deleted so far.
    pub deleted_snapshots: Mutex<Vec<String>>,
    /// Recorded start invocations.
    pub starts: Mutex<Vec<StartMode>>,
    /// How many times the node was stopped.
    pub stops: Mutex<u32>,
    /// Table directories handed to sstableloader.
    pub loaded_tables: Mutex<Vec<PathBuf>>,
}

impl FakeCassandra {
    /// Create a fake over the given data root.
    #[must_use]
    pub fn new(fqdn: &str, data_root: PathBuf, schema: &str, tokenmap: TokenMap) -> Self {
        let commitlog = data_root.join("..").join("commitlog");
        let saved_caches = data_root.join("..").join("saved_caches");
        Self {
            fqdn: fqdn.to_owned(),
            data_root,
            commitlog,
            saved_caches,
            schema: schema.to_owned(),
            tokenmap,
            up_hosts: Mutex::new(BTreeSet::new()),
            created_snapshots: Mutex::new(Vec::new()),
            deleted_snapshots: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(0),
            loaded_tables: Mutex::new(Vec::new()),
        }
    }

    /// Mark a host as up for health checks.
    pub fn set_up(&self, host: &str) {
        if let Ok(mut guard) = self.up_hosts.lock() {
            guard.insert(host.to_owned());
        }
    }

    fn snapshot_live_files(&self, tag: &str) -> Result<()> {
        let keyspaces = match std::fs::read_dir(&self.data_root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(ErrorEnvelope::from(error)),
        };
        for keyspace in keyspaces {
            let keyspace = keyspace.map_err(ErrorEnvelope::from)?;
            if !keyspace.path().is_dir() {
                continue;
            }
            for table in std::fs::read_dir(keyspace.path()).map_err(ErrorEnvelope::from)? {
                let table = table.map_err(ErrorEnvelope::from)?;
                if !table.path().is_dir() {
                    continue;
                }
                let snapshot_dir = table.path().join("snapshots").join(tag);
                std::fs::create_dir_all(&snapshot_dir).map_err(ErrorEnvelope::from)?;
                for file in std::fs::read_dir(table.path()).map_err(ErrorEnvelope::from)? {
                    let file = file.map_err(ErrorEnvelope::from)?;
                    if file.path().is_file() {
                        std::fs::copy(file.path(), snapshot_dir.join(file.file_name()))
                            .map_err(ErrorEnvelope::from)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl CassandraPort for FakeCassandra {
    fn create_snapshot(&self, _ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.snapshot_live_files(&tag)?;
            if let Ok(mut guard) = self.created_snapshots.lock() {
                guard.push(tag);
            }
            Ok(())
        })
    }

    fn delete_snapshot(&self, _ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.deleted_snapshots.lock() {
                guard.push(tag);
            }
            Ok(())
        })
    }

    fn find_snapshot_dirs(
        &self,
        _ctx: &RequestContext,
        tag: String,
    ) -> BoxFuture<'_, Result<Vec<SnapshotDir>>> {
        Box::pin(async move {
            let mut dirs = Vec::new();
            let keyspaces = match std::fs::read_dir(&self.data_root) {
                Ok(entries) => entries,
                Err(_) => return Ok(dirs),
            };
            for keyspace in keyspaces.flatten() {
                if !keyspace.path().is_dir() {
                    continue;
                }
                let keyspace_name = keyspace.file_name().to_string_lossy().to_string();
                if ringvault_domain::is_reserved_keyspace(&keyspace_name) {
                    continue;
                }
                let Ok(tables) = std::fs::read_dir(keyspace.path()) else {
                    continue;
                };
                for table in tables.flatten() {
                    let snapshot = table.path().join("snapshots").join(&tag);
                    if snapshot.is_dir() {
                        dirs.push(SnapshotDir {
                            path: snapshot,
                            keyspace: keyspace_name.clone(),
                            table: table.file_name().to_string_lossy().to_string(),
                        });
                    }
                }
            }
            dirs.sort_by(|a, b| (&a.keyspace, &a.table).cmp(&(&b.keyspace, &b.table)));
            Ok(dirs)
        })
    }

    fn dump_schema(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<String>> {
        let schema = self.schema.clone();
        Box::pin(async move { Ok(schema) })
    }

    fn tokenmap(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<TokenMap>> {
        let tokenmap = self.tokenmap.clone();
        Box::pin(async move { Ok(tokenmap) })
    }

    fn tokenmap_of(&self, ctx: &RequestContext, _host: String) -> BoxFuture<'_, Result<TokenMap>> {
        self.tokenmap(ctx)
    }

    fn shutdown(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.stops.lock() {
                *guard += 1;
            }
            Ok(())
        })
    }

    fn start_with_implicit_token(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.starts.lock() {
                guard.push(StartMode::Implicit);
            }
            Ok(())
        })
    }

    fn start_with_tokens(
        &self,
        _ctx: &RequestContext,
        tokens: Vec<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.starts.lock() {
                guard.push(StartMode::WithTokens(tokens));
            }
            Ok(())
        })
    }

    fn is_node_up(
        &self,
        _ctx: &RequestContext,
        host: String,
        _check: HealthCheck,
    ) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            Ok(self
                .up_hosts
                .lock()
                .map(|guard| guard.contains(&host))
                .unwrap_or(false))
        })
    }

    fn load_sstables(&self, _ctx: &RequestContext, table_dir: PathBuf) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Ok(mut guard) = self.loaded_tables.lock() {
                guard.push(table_dir);
            }
            Ok(())
        })
    }

    fn data_root(&self) -> PathBuf {
        self.data_root.clone()
    }

    fn commit_logs_path(&self) -> PathBuf {
        self.commitlog.clone()
    }

    fn saved_caches_path(&self) -> PathBuf {
        self.saved_caches.clone()
    }

    fn fqdn(&self) -> &str {
        &self.fqdn
    }
}

#[derive(Debug, Default)]
struct FakeRemoteState {
    statuses: BTreeMap<String, VecDeque<RemoteStatus>>,
    stderr: BTreeMap<String, String>,
    run_exit_codes: BTreeMap<String, i32>,
    commands: Vec<(String, String)>,
    supervised: Vec<(String, String, String)>,
}

/// A scripted remote executor.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeRemoteState>>,
}

impl FakeRemote {
    /// Create an executor where every command immediately succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the successive poll statuses of a host's supervised job.
    pub fn script_statuses(&self, host: &str, statuses: &[RemoteStatus]) {
        if let Ok(mut guard) = self.state.lock() {
            guard
                .statuses
                .insert(host.to_owned(), statuses.iter().copied().collect());
        }
    }

    /// Script the stderr capture of a host.
    pub fn script_stderr(&self, host: &str, body: &str) {
        if let Ok(mut guard) = self.state.lock() {
            guard.stderr.insert(host.to_owned(), body.to_owned());
        }
    }

    /// Script the exit code of plain `run` commands on a host.
    pub fn script_run_exit(&self, host: &str, exit_code: i32) {
        if let Ok(mut guard) = self.state.lock() {
            guard.run_exit_codes.insert(host.to_owned(), exit_code);
        }
    }

    /// All `(host, command)` pairs passed to `run`.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|guard| guard.commands.clone())
            .unwrap_or_default()
    }

    /// All `(host, job_dir, command)` triples started under supervision.
    #[must_use]
    pub fn supervised(&self) -> Vec<(String, String, String)> {
        self.state
            .lock()
            .map(|guard| guard.supervised.clone())
            .unwrap_or_default()
    }
}

struct FakeHandle {
    host: String,
    state: Arc<Mutex<FakeRemoteState>>,
}

impl RemoteHandle for FakeHandle {
    fn host(&self) -> &str {
        &self.host
    }

    fn poll(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<RemoteStatus>> {
        let state = Arc::clone(&self.state);
        let host = self.host.clone();
        Box::pin(async move {
            let mut guard = state
                .lock()
                .map_err(|_| ErrorEnvelope::invariant(ErrorCode::internal(), "fake poisoned"))?;
            let queue = guard.statuses.entry(host).or_default();
            Ok(match queue.len() {
                0 => RemoteStatus::Finished,
                1 => *queue.front().unwrap_or(&RemoteStatus::Finished),
                _ => queue.pop_front().unwrap_or(RemoteStatus::Finished),
            })
        })
    }

    fn fetch_stderr(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<String>> {
        let state = Arc::clone(&self.state);
        let host = self.host.clone();
        Box::pin(async move {
            let guard = state
                .lock()
                .map_err(|_| ErrorEnvelope::invariant(ErrorCode::internal(), "fake poisoned"))?;
            Ok(guard.stderr.get(&host).cloned().unwrap_or_default())
        })
    }
}

impl RemoteExecPort for FakeRemote {
    fn run(
        &self,
        _ctx: &RequestContext,
        host: String,
        command: String,
    ) -> BoxFuture<'_, Result<i32>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state
                .lock()
                .map_err(|_| ErrorEnvelope::invariant(ErrorCode::internal(), "fake poisoned"))?;
            let exit = guard.run_exit_codes.get(&host).copied().unwrap_or(0);
            guard.commands.push((host, command));
            Ok(exit)
        })
    }

    fn start_supervised(
        &self,
        _ctx: &RequestContext,
        host: String,
        job_dir: String,
        command: String,
    ) -> BoxFuture<'_, Result<Box<dyn RemoteHandle>>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            {
                let mut guard = state.lock().map_err(|_| {
                    ErrorEnvelope::invariant(ErrorCode::internal(), "fake poisoned")
                })?;
                guard
                    .supervised
                    .push((host.clone(), job_dir, command));
            }
            Ok(Box::new(FakeHandle { host, state }) as Box<dyn RemoteHandle>)
        })
    }
}

/// A prompt double with a fixed answer.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Create a prompt that always answers `answer`.
    #[must_use]
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Messages the operator was asked about.
    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl PromptPort for ScriptedPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        if let Ok(mut guard) = self.asked.lock() {
            guard.push(message.to_owned());
        }
        Ok(self.answer)
    }
}
