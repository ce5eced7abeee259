//! Cassandra node control over subprocess tooling.
//!
//! Snapshots and liveness go through `nodetool`, schema dumps through
//! `cqlsh`, start/stop through the configured service commands. The
//! data, commitlog, and saved-caches directories come from
//! `cassandra.yaml`.

use ringvault_domain::{is_reserved_keyspace, RingEntry, TokenMap};
use ringvault_ports::{BoxFuture, CassandraPort, HealthCheck, SnapshotDir};
use ringvault_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Settings needed to control one node.
#[derive(Debug, Clone)]
pub struct CassandraNodeConfig {
    /// Command that starts the node.
    pub start_cmd: String,
    /// Command that stops the node.
    pub stop_cmd: String,
    /// Path of `cassandra.yaml`.
    pub config_file: PathBuf,
    /// CQL user name ("" disables authentication flags).
    pub cql_username: String,
    /// CQL password.
    pub cql_password: String,
    /// Non-zero for ccm test clusters.
    pub is_ccm: u32,
    /// sstableloader binary.
    pub sstableloader_bin: String,
    /// Fqdn this node answers to.
    pub fqdn: String,
}

/// Directory settings read from `cassandra.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassandraYaml {
    /// The single configured data directory.
    pub data_root: PathBuf,
    /// Commitlog directory.
    pub commitlog_directory: PathBuf,
    /// Saved-caches directory.
    pub saved_caches_directory: PathBuf,
    /// Listen address, when set.
    pub listen_address: Option<String>,
}

impl CassandraYaml {
    /// Read and validate `cassandra.yaml`.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::config_invalid(),
                format!("cannot read {}: {error}", path.display()),
            )
        })?;
        Self::parse(&raw)
    }

    /// Parse the YAML document.
    pub fn parse(raw: &str) -> Result<Self> {
        let doc: serde_yaml_ng::Value = serde_yaml_ng::from_str(raw).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::config_invalid(),
                format!("cassandra.yaml is not valid YAML: {error}"),
            )
        })?;

        let data_dirs = doc
            .get("data_file_directories")
            .and_then(|value| value.as_sequence())
            .ok_or_else(|| invalid_yaml("data_file_directories must be configured"))?;
        if data_dirs.len() != 1 {
            return Err(invalid_yaml("exactly one data directory is supported"));
        }
        let data_root = data_dirs[0]
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| invalid_yaml("data_file_directories entry must be a string"))?;

        let commitlog_directory = doc
            .get("commitlog_directory")
            .and_then(|value| value.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| invalid_yaml("commitlog_directory must be configured"))?;
        let saved_caches_directory = doc
            .get("saved_caches_directory")
            .and_then(|value| value.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| invalid_yaml("saved_caches_directory must be configured"))?;
        let listen_address = doc
            .get("listen_address")
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        Ok(Self {
            data_root,
            commitlog_directory,
            saved_caches_directory,
            listen_address,
        })
    }
}

fn invalid_yaml(detail: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::config_invalid(), format!("cassandra.yaml: {detail}"))
}

/// Subprocess-backed node control adapter.
#[derive(Debug, Clone)]
pub struct CassandraNode {
    config: CassandraNodeConfig,
    yaml: CassandraYaml,
    contact_point: String,
}

impl CassandraNode {
    /// Build the adapter, reading `cassandra.yaml`.
    pub fn new(config: CassandraNodeConfig) -> Result<Self> {
        let yaml = CassandraYaml::read(&config.config_file)?;
        let contact_point = yaml
            .listen_address
            .clone()
            .unwrap_or_else(|| config.fqdn.clone());
        Ok(Self {
            config,
            yaml,
            contact_point,
        })
    }

    /// Build the adapter from already-parsed directory settings.
    #[must_use]
    pub fn with_yaml(config: CassandraNodeConfig, yaml: CassandraYaml) -> Self {
        let contact_point = yaml
            .listen_address
            .clone()
            .unwrap_or_else(|| config.fqdn.clone());
        Self {
            config,
            yaml,
            contact_point,
        }
    }

    const fn is_ccm(&self) -> bool {
        self.config.is_ccm != 0
    }

    async fn nodetool(&self, args: &[&str]) -> Result<String> {
        if self.is_ccm() {
            let wrapped = format!("ccm node1 nodetool \"{}\"", args.join(" "));
            return run_shell(&wrapped).await;
        }
        run_args("nodetool", args).await
    }

    fn cqlsh_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.config.cql_username.is_empty() {
            args.push("-u".to_owned());
            args.push(self.config.cql_username.clone());
            args.push("-p".to_owned());
            args.push(self.config.cql_password.clone());
        }
        args.push(self.contact_point.clone());
        args
    }
}

impl CassandraPort for CassandraNode {
    fn create_snapshot(&self, _ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.nodetool(&["snapshot", "-t", &tag]).await?;
            Ok(())
        })
    }

    fn delete_snapshot(&self, _ctx: &RequestContext, tag: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Clearing a snapshot that never existed must not fail the
            // surrounding backup.
            let _ = self.nodetool(&["clearsnapshot", "-t", &tag]).await;
            Ok(())
        })
    }

    fn find_snapshot_dirs(
        &self,
        _ctx: &RequestContext,
        tag: String,
    ) -> BoxFuture<'_, Result<Vec<SnapshotDir>>> {
        let root = self.yaml.data_root.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || find_snapshot_dirs_under(&root, &tag))
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

    fn dump_schema(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut args: Vec<String> = self.cqlsh_args();
            args.push("-e".to_owned());
            args.push("DESCRIBE SCHEMA".to_owned());
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let raw = run_args("cqlsh", &arg_refs).await?;
            Ok(filter_schema(&raw))
        })
    }

    fn tokenmap(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<TokenMap>> {
        self.tokenmap_of(ctx, self.contact_point.clone())
    }

    fn tokenmap_of(&self, _ctx: &RequestContext, host: String) -> BoxFuture<'_, Result<TokenMap>> {
        Box::pin(async move {
            let raw = self.nodetool(&["-h", &host, "ring"]).await?;
            parse_ring_output(&raw)
        })
    }

    fn shutdown(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // A node that is already down exits non-zero here; that is
            // the desired end state either way.
            let _ = run_shell(&self.config.stop_cmd).await;
            Ok(())
        })
    }

    fn start_with_implicit_token(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            run_shell(&self.config.start_cmd).await?;
            Ok(())
        })
    }

    fn start_with_tokens(
        &self,
        _ctx: &RequestContext,
        tokens: Vec<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_ccm() {
                run_shell(&self.config.start_cmd).await?;
                return Ok(());
            }
            let jvm_opts = format!(
                "-Dcassandra.initial_token={} -Dcassandra.auto_bootstrap=false",
                tokens.join(",")
            );
            let start = self
                .config
                .start_cmd
                .split_whitespace()
                .filter(|part| *part != "sudo")
                .collect::<Vec<_>>()
                .join(" ");
            let command = if has_systemd().await {
                format!(
                    "sudo systemctl set-environment JVM_OPTS=\"{jvm_opts}\" && sudo {start}"
                )
            } else {
                format!("sudo env JVM_OPTS=\"{jvm_opts}\" {start}")
            };
            run_shell(&command).await?;
            Ok(())
        })
    }

    fn is_node_up(
        &self,
        _ctx: &RequestContext,
        host: String,
        check: HealthCheck,
    ) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let cql = matches!(check, HealthCheck::Cql | HealthCheck::All);
            let thrift = matches!(check, HealthCheck::Thrift | HealthCheck::All);

            let mut up = true;
            if cql {
                up &= transport_running(&host, "statusbinary").await;
            }
            if thrift {
                up &= transport_running(&host, "statusthrift").await;
            }
            Ok(up)
        })
    }

    fn load_sstables(&self, _ctx: &RequestContext, table_dir: PathBuf) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let dir = table_dir.display().to_string();
            run_args(
                &self.config.sstableloader_bin,
                &["-d", &self.contact_point, &dir],
            )
            .await?;
            Ok(())
        })
    }

    fn data_root(&self) -> PathBuf {
        self.yaml.data_root.clone()
    }

    fn commit_logs_path(&self) -> PathBuf {
        self.yaml.commitlog_directory.clone()
    }

    fn saved_caches_path(&self) -> PathBuf {
        self.yaml.saved_caches_directory.clone()
    }

    fn fqdn(&self) -> &str {
        &self.config.fqdn
    }
}

/// Walk `<root>/<keyspace>/<table>/snapshots/<tag>` directories.
fn find_snapshot_dirs_under(root: &Path, tag: &str) -> Result<Vec<SnapshotDir>> {
    let mut dirs = Vec::new();
    let keyspaces = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(error) => return Err(ErrorEnvelope::from(error)),
    };
    for keyspace_entry in keyspaces {
        let keyspace_entry = keyspace_entry.map_err(ErrorEnvelope::from)?;
        if !keyspace_entry.path().is_dir() {
            continue;
        }
        let keyspace = keyspace_entry.file_name().to_string_lossy().to_string();
        if is_reserved_keyspace(&keyspace) {
            continue;
        }
        let tables = std::fs::read_dir(keyspace_entry.path()).map_err(ErrorEnvelope::from)?;
        for table_entry in tables {
            let table_entry = table_entry.map_err(ErrorEnvelope::from)?;
            let snapshot = table_entry.path().join("snapshots").join(tag);
            if snapshot.is_dir() {
                dirs.push(SnapshotDir {
                    path: snapshot,
                    keyspace: keyspace.clone(),
                    table: table_entry.file_name().to_string_lossy().to_string(),
                });
            }
        }
    }
    dirs.sort_by(|a, b| (&a.keyspace, &a.table).cmp(&(&b.keyspace, &b.table)));
    Ok(dirs)
}

/// Drop reserved-keyspace statements from a `DESCRIBE SCHEMA` dump.
fn filter_schema(raw: &str) -> String {
    raw.split("\n\n")
        .filter(|block| {
            let block = block.trim();
            !block.is_empty() && !mentions_reserved_keyspace(block)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn mentions_reserved_keyspace(block: &str) -> bool {
    ringvault_domain::RESERVED_KEYSPACES.iter().any(|reserved| {
        block.contains(&format!("KEYSPACE {reserved} "))
            || block.contains(&format!("KEYSPACE {reserved}\n"))
            || block.contains(&format!(" {reserved}."))
    })
}

/// Parse `nodetool ring` output into a tokenmap.
fn parse_ring_output(raw: &str) -> Result<TokenMap> {
    let mut map = TokenMap::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("Datacenter")
            || trimmed.starts_with('=')
            || trimmed.starts_with("Address")
            || trimmed.starts_with("Warning")
            || trimmed.starts_with("Note:")
        {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }
        let host = fields[0].to_owned();
        let status = fields[2];
        let token = (*fields.last().unwrap_or(&"")).to_owned();
        if token.parse::<i128>().is_err() {
            continue;
        }
        match map.get(&host) {
            Some(entry) => {
                let mut tokens = entry.tokens.clone();
                tokens.push(token);
                let is_up = entry.is_up;
                map.insert(host, RingEntry { tokens, is_up });
            },
            None => {
                map.insert(
                    host,
                    RingEntry {
                        tokens: vec![token],
                        is_up: status.eq_ignore_ascii_case("up"),
                    },
                );
            },
        }
    }
    if map.is_empty() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            "nodetool ring produced no ring entries",
        ));
    }
    Ok(map)
}

async fn transport_running(host: &str, probe: &str) -> bool {
    match run_args("nodetool", &["-h", host, probe]).await {
        Ok(output) => output.contains("running"),
        Err(_) => false,
    }
}

async fn has_systemd() -> bool {
    run_args("systemctl", &["--version"]).await.is_ok()
}

async fn run_args(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|error| command_error(program, &error.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(command_error(
            program,
            &format!("exit {:?}: {stderr}", output.status.code()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn run_shell(command: &str) -> Result<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|error| command_error(command, &error.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(command_error(
            command,
            &format!("exit {:?}: {stderr}", output.status.code()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn command_error(command: &str, detail: &str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::io(),
        format!("command {command} failed: {detail}"),
        ErrorClass::NonRetriable,
    )
    .with_metadata("command", command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r"
cluster_name: test
data_file_directories:
  - /var/lib/cassandra/data
commitlog_directory: /var/lib/cassandra/commitlog
saved_caches_directory: /var/lib/cassandra/saved_caches
listen_address: 10.0.0.1
";

    #[test]
    fn yaml_directories_are_extracted() {
        let yaml = CassandraYaml::parse(YAML).expect("parse yaml");
        assert_eq!(yaml.data_root, PathBuf::from("/var/lib/cassandra/data"));
        assert_eq!(
            yaml.commitlog_directory,
            PathBuf::from("/var/lib/cassandra/commitlog")
        );
        assert_eq!(yaml.listen_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn multiple_data_directories_are_rejected() {
        let raw = "
data_file_directories:
  - /data/one
  - /data/two
commitlog_directory: /cl
saved_caches_directory: /sc
";
        assert!(CassandraYaml::parse(raw).is_err());
    }

    #[test]
    fn ring_output_groups_vnodes_per_host() {
        let raw = "
Datacenter: dc1
==========
Address    Rack   Status State   Load       Owns     Token
                                                     9000
10.0.0.1   rack1  Up     Normal  100.5 KB   33.3%    -9000
10.0.0.2   rack1  Up     Normal  98.2 KB    33.3%    0
10.0.0.1   rack1  Up     Normal  100.5 KB   33.3%    4500
10.0.0.3   rack1  Down   Normal  97.0 KB    33.4%    9000
";
        let map = parse_ring_output(raw).expect("parse ring");
        assert_eq!(map.len(), 3);
        let n1 = map.get("10.0.0.1").expect("n1 entry");
        assert_eq!(n1.tokens, vec!["-9000".to_owned(), "4500".to_owned()]);
        assert!(n1.is_up);
        assert!(!map.get("10.0.0.3").expect("n3 entry").is_up);
    }

    #[test]
    fn empty_ring_is_an_error() {
        assert!(parse_ring_output("Datacenter: dc1\n").is_err());
    }

    #[test]
    fn schema_filter_drops_reserved_keyspaces() {
        let raw = "CREATE KEYSPACE shop WITH replication = {'class': 'SimpleStrategy'};\n\nCREATE KEYSPACE system_traces WITH replication = {'class': 'SimpleStrategy'};\n\nCREATE TABLE shop.orders (id int PRIMARY KEY);";
        let filtered = filter_schema(raw);
        assert!(filtered.contains("KEYSPACE shop"));
        assert!(filtered.contains("shop.orders"));
        assert!(!filtered.contains("system_traces"));
    }

    #[test]
    fn snapshot_walk_finds_tagged_dirs_only() -> Result<()> {
        let root = std::env::temp_dir().join(format!("ringvault_snap_{}", uuid::Uuid::new_v4()));
        let tagged = root.join("shop/orders-abc/snapshots/ringvault-1");
        let other = root.join("shop/orders-abc/snapshots/other-tag");
        let reserved = root.join("system_traces/events-def/snapshots/ringvault-1");
        for dir in [&tagged, &other, &reserved] {
            std::fs::create_dir_all(dir).map_err(ErrorEnvelope::from)?;
        }

        let dirs = find_snapshot_dirs_under(&root, "ringvault-1")?;
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].keyspace, "shop");
        assert_eq!(dirs[0].table, "orders-abc");
        assert_eq!(dirs[0].path, tagged);
        Ok(())
    }
}
