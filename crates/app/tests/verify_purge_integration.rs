//! Verification and retention tests.

mod common;

use common::{single_node, run_backup, write_sstables, NullLogger};
use ringvault_app::{purge, verify_backup, Problem, PurgePolicy};
use ringvault_domain::{BackupMode, BackupName, NodeFqdn, RingEntry, TokenMap};
use ringvault_ports::LoggerPort;
use ringvault_shared::{RequestContext, Result};
use std::sync::Arc;

#[tokio::test]
async fn truncated_object_reports_exactly_one_wrong_size() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("s3");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[
            ("na-1-big-Data.db", b"payload payload"),
            ("na-1-big-Index.db", b"idx"),
        ],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    // Corrupt one data object: truncate by one byte.
    cluster
        .storage
        .truncate_by_one("n1/bk1/data/shop/orders-abc123/na-1-big-Data.db")?;

    let name = BackupName::parse("bk1").expect("name");
    let report = verify_backup(&ctx, &cluster.catalog, &name).await?;
    assert!(report.complete);
    assert_eq!(report.problems.len(), 1, "problems: {:?}", report.problems);
    match &report.problems[0].1 {
        Problem::WrongFileSize { path, expected, actual } => {
            assert_eq!(path, "n1/bk1/data/shop/orders-abc123/na-1-big-Data.db");
            assert_eq!(*expected, 15);
            assert_eq!(*actual, 14);
        },
        other => panic!("expected a wrong-size problem, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn same_size_corruption_reports_a_wrong_checksum() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("checksum");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"payload")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    cluster
        .storage
        .flip_first_byte("n1/bk1/data/shop/orders-abc123/na-1-big-Data.db")?;

    let name = BackupName::parse("bk1").expect("name");
    let report = verify_backup(&ctx, &cluster.catalog, &name).await?;
    assert_eq!(report.problems.len(), 1);
    assert!(matches!(report.problems[0].1, Problem::WrongChecksum { .. }));
    Ok(())
}

#[tokio::test]
async fn stray_data_objects_are_reported_for_full_backups_only() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("stray");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"payload")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    cluster
        .storage
        .seed("n1/bk1/data/shop/orders-abc123/orphan.db", b"stray")?;

    let name = BackupName::parse("bk1").expect("name");
    let report = verify_backup(&ctx, &cluster.catalog, &name).await?;
    assert_eq!(report.problems.len(), 1);
    assert!(matches!(report.problems[0].1, Problem::Unexpected { .. }));
    Ok(())
}

#[tokio::test]
async fn references_into_a_previous_backup_verify_clean() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("verify_refs");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"immutable")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    // bk2 reuses bk1's object through the cache; its manifest points
    // into bk1's data prefix.
    run_backup(&ctx, &cluster, "bk2", BackupMode::Full).await?;
    let name = BackupName::parse("bk2").expect("name");
    let report = verify_backup(&ctx, &cluster.catalog, &name).await?;
    assert!(report.is_ok(), "problems: {:?}", report.problems);

    // Deleting the referenced object surfaces as Missing on bk2.
    cluster
        .catalog
        .storage()
        .delete(&ctx, "n1/bk1/data/shop/orders-abc123/na-1-big-Data.db".to_owned())
        .await?;
    let report = verify_backup(&ctx, &cluster.catalog, &name).await?;
    assert_eq!(report.problems.len(), 1);
    assert!(matches!(report.problems[0].1, Problem::Missing { .. }));
    Ok(())
}

#[tokio::test]
async fn cluster_membership_follows_the_index_entries() -> Result<()> {
    // Three fake node backups under one name, seeded straight into
    // the index; n1 carries the full cluster tokenmap.
    let ctx = RequestContext::new_op();
    let cluster = single_node("s5");

    let mut tokenmap = TokenMap::new();
    for (host, token) in [("n1", "100"), ("n2", "200"), ("n3", "300")] {
        tokenmap.insert(
            host.to_owned(),
            RingEntry {
                tokens: vec![token.to_owned()],
                is_up: true,
            },
        );
    }
    cluster.storage.seed(
        "index/backup_index/bkc/tokenmap_n1.json",
        tokenmap.to_json()?.as_bytes(),
    )?;
    for host in ["n1", "n2", "n3"] {
        cluster
            .storage
            .seed(&format!("index/backup_index/bkc/manifest_{host}.json"), b"[]")?;
    }

    let name = BackupName::parse("bkc").expect("name");
    let backup = cluster.catalog.get_cluster_backup(&ctx, &name).await?;
    assert!(backup.is_complete());
    assert!(backup.missing_nodes().is_empty());

    // Remove n2's manifest entry: n2 drops out of the member set.
    cluster
        .catalog
        .storage()
        .delete(&ctx, "index/backup_index/bkc/manifest_n2.json".to_owned())
        .await?;
    let backup = cluster.catalog.get_cluster_backup(&ctx, &name).await?;
    assert!(!backup.is_complete());
    assert_eq!(backup.missing_nodes(), vec!["n2".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn count_retention_drops_the_oldest_full_backup() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("purge_count");
    let logger: Arc<dyn LoggerPort> = Arc::new(NullLogger);

    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"one")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-2-big-Data.db", b"two")],
    );
    run_backup(&ctx, &cluster, "bk2", BackupMode::Full).await?;

    let policy = PurgePolicy {
        max_backup_age_days: 0,
        max_backup_count: 1,
    };
    let report = purge(&ctx, &cluster.catalog, &logger, policy, u64::MAX).await?;
    assert_eq!(
        report.deleted_backups,
        vec![("n1".to_owned(), "bk1".to_owned())]
    );

    // bk1 is gone from storage and from the index; bk2 survives.
    let names = cluster.storage.object_names();
    assert!(!names.iter().any(|name| name.starts_with("n1/bk1/")));
    assert!(names.iter().any(|name| name.starts_with("n1/bk2/")));
    let records = cluster.catalog.list_node_backups(&ctx, None).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name.as_str(), "bk2");
    Ok(())
}

#[tokio::test]
async fn incremental_purge_keeps_objects_still_referenced() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("purge_incr");
    let logger: Arc<dyn LoggerPort> = Arc::new(NullLogger);

    // bk1 uploads the shared object; bk2 re-references it and adds a
    // second generation.
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"shared")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Incremental).await?;
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-2-big-Data.db", b"fresh")],
    );
    run_backup(&ctx, &cluster, "bk2", BackupMode::Incremental).await?;

    let policy = PurgePolicy {
        max_backup_age_days: 0,
        max_backup_count: 1,
    };
    purge(&ctx, &cluster.catalog, &logger, policy, u64::MAX).await?;

    // The shared pool object is still referenced by bk2 and survives.
    let names = cluster.storage.object_names();
    assert!(names.contains(&"n1/data/shop/orders-abc123/na-1-big-Data.db".to_owned()));
    assert!(names.contains(&"n1/data/shop/orders-abc123/na-2-big-Data.db".to_owned()));
    assert!(!names.iter().any(|name| name.starts_with("n1/bk1/")));

    let fqdn = NodeFqdn::parse("n1").expect("fqdn");
    let latest = cluster
        .catalog
        .latest_node_backup(&ctx, &fqdn)
        .await?
        .expect("bk2 survives");
    assert_eq!(latest.name.as_str(), "bk2");
    Ok(())
}
