//! Shared fixtures for the app integration tests.
#![allow(dead_code)]

use ringvault_app::{backup_node, BackupNodeDeps, BackupNodeInput, BackupNodeReport, Catalog};
use ringvault_domain::{BackupLayout, BackupMode, BackupName, NodeFqdn, RingEntry, TokenMap};
use ringvault_ports::{LogFields, LogLevel, LoggerPort};
use ringvault_shared::{RequestContext, Result};
use ringvault_testkit::{FakeCassandra, InMemoryStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Logger double that swallows every event.
pub struct NullLogger;

impl LoggerPort for NullLogger {
    fn log(&self, _level: LogLevel, _event: &str, _message: &str, _fields: Option<LogFields>) {}
}

/// One wired single-node test cluster over a temp data root.
pub struct TestCluster {
    pub storage: InMemoryStorage,
    pub catalog: Catalog,
    pub cassandra: Arc<FakeCassandra>,
    pub fqdn: NodeFqdn,
    pub data_root: PathBuf,
}

/// Build a cluster whose tokenmap holds the given `(fqdn, token)`
/// pairs; the fake node acts as the first one.
pub fn cluster_with_ring(tag: &str, ring: &[(&str, &str)]) -> TestCluster {
    let data_root = std::env::temp_dir()
        .join(format!("ringvault_it_{tag}_{}", uuid::Uuid::new_v4()))
        .join("data");
    std::fs::create_dir_all(&data_root).expect("create data root");

    let mut tokenmap = TokenMap::new();
    for (fqdn, token) in ring {
        tokenmap.insert(
            (*fqdn).to_owned(),
            RingEntry {
                tokens: vec![(*token).to_owned()],
                is_up: true,
            },
        );
    }

    let fqdn_str = ring.first().map(|(fqdn, _)| *fqdn).unwrap_or("n1");
    let cassandra = Arc::new(FakeCassandra::new(
        fqdn_str,
        data_root.clone(),
        "CREATE KEYSPACE shop WITH replication = {'class': 'SimpleStrategy'};",
        tokenmap,
    ));

    let storage = InMemoryStorage::new();
    let catalog = Catalog::new(Arc::new(storage.clone()), BackupLayout::new(""));

    TestCluster {
        storage,
        catalog,
        cassandra,
        fqdn: NodeFqdn::parse(fqdn_str).expect("fqdn"),
        data_root,
    }
}

/// Build a single-node cluster.
pub fn single_node(tag: &str) -> TestCluster {
    cluster_with_ring(tag, &[("n1", "100")])
}

/// Write live SSTable files into `<data_root>/<keyspace>/<table>/`.
pub fn write_sstables(data_root: &Path, keyspace: &str, table: &str, files: &[(&str, &[u8])]) {
    let table_dir = data_root.join(keyspace).join(table);
    std::fs::create_dir_all(&table_dir).expect("create table dir");
    for (name, payload) in files {
        std::fs::write(table_dir.join(name), payload).expect("write sstable");
    }
}

/// Backup engine deps with test-friendly polling.
pub fn backup_deps(cluster: &TestCluster) -> BackupNodeDeps {
    BackupNodeDeps {
        catalog: cluster.catalog.clone(),
        cassandra: cluster.cassandra.clone(),
        logger: Arc::new(NullLogger),
        monitoring: None,
        stagger_poll: Duration::from_millis(10),
    }
}

/// Run one backup to completion.
pub async fn run_backup(
    ctx: &RequestContext,
    cluster: &TestCluster,
    name: &str,
    mode: BackupMode,
) -> Result<BackupNodeReport> {
    let deps = backup_deps(cluster);
    backup_node(
        ctx,
        &deps,
        BackupNodeInput {
            backup_name: Some(BackupName::parse(name).expect("backup name")),
            stagger: None,
            mode,
        },
    )
    .await
}
