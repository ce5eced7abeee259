//! Node and cluster restore tests.

mod common;

use common::{run_backup, single_node, write_sstables, NullLogger};
use ringvault_app::{
    restore_cluster, restore_node, RestoreClusterDeps, RestoreClusterInput, RestoreNodeDeps,
    RestoreNodeInput, RestoreTargets,
};
use ringvault_domain::{BackupMode, BackupName, RingEntry, TokenMap};
use ringvault_ports::{HealthCheck, LoggerPort, RemoteStatus};
use ringvault_shared::{ErrorCode, RequestContext, Result};
use ringvault_testkit::{FakeRemote, ScriptedPrompt, StartMode};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn restore_deps(cluster: &common::TestCluster) -> RestoreNodeDeps {
    RestoreNodeDeps {
        catalog: cluster.catalog.clone(),
        cassandra: cluster.cassandra.clone(),
        logger: Arc::new(NullLogger),
        health_check: HealthCheck::Cql,
        seed_poll: Duration::from_millis(10),
        seed_attempts: 3,
    }
}

#[tokio::test]
async fn in_place_restore_round_trips_the_sstables() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_rt");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[
            ("na-1-big-Data.db", b"rows"),
            ("na-1-big-Index.db", b"idx"),
        ],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    // The table mutates after the backup.
    let table_dir = cluster.data_root.join("shop").join("orders-abc123");
    std::fs::write(table_dir.join("na-9-big-Data.db"), b"later").expect("write extra");

    let temp = std::env::temp_dir().join(format!("ringvault_restore_{}", uuid::Uuid::new_v4()));
    let deps = restore_deps(&cluster);
    restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: temp,
            in_place: true,
            keep_auth: false,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: false,
        },
    )
    .await?;

    // The table directory now holds exactly the backed-up basenames.
    let restored: BTreeSet<String> = std::fs::read_dir(&table_dir)
        .expect("read table dir")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    let expected: BTreeSet<String> =
        ["na-1-big-Data.db", "na-1-big-Index.db"].iter().map(|s| (*s).to_owned()).collect();
    assert_eq!(restored, expected);

    // In-place restores keep the node's implicit tokens.
    let starts = cluster.cassandra.starts.lock().expect("lock").clone();
    assert_eq!(starts, vec![StartMode::Implicit]);
    assert_eq!(*cluster.cassandra.stops.lock().expect("lock"), 1);

    // The restored directory is owned like the data root.
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let root_meta = std::fs::metadata(&cluster.data_root).expect("data root metadata");
        let restored_meta = std::fs::metadata(&table_dir).expect("table dir metadata");
        assert_eq!(restored_meta.uid(), root_meta.uid());
        assert_eq!(restored_meta.gid(), root_meta.gid());
    }
    Ok(())
}

#[tokio::test]
async fn requested_verification_runs_after_the_restore() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_verify");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"rows")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    let temp = std::env::temp_dir().join(format!("ringvault_restore_{}", uuid::Uuid::new_v4()));
    let deps = restore_deps(&cluster);
    restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: temp.clone(),
            in_place: true,
            keep_auth: false,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: true,
        },
    )
    .await?;

    // A corrupted object makes the same restore fail its verification.
    cluster
        .storage
        .truncate_by_one("n1/bk1/data/shop/orders-abc123/na-1-big-Data.db")?;
    let error = restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: temp,
            in_place: true,
            keep_auth: false,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: true,
        },
    )
    .await
    .expect_err("verification must flag the corruption");
    assert_eq!(error.code, ErrorCode::integrity());
    Ok(())
}

#[tokio::test]
async fn out_of_place_restore_passes_explicit_tokens() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_oop");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"rows")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    let temp = std::env::temp_dir().join(format!("ringvault_restore_{}", uuid::Uuid::new_v4()));
    let deps = restore_deps(&cluster);
    restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: temp,
            in_place: false,
            keep_auth: false,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: false,
        },
    )
    .await?;

    let starts = cluster.cassandra.starts.lock().expect("lock").clone();
    assert_eq!(starts, vec![StartMode::WithTokens(vec!["100".to_owned()])]);
    Ok(())
}

#[tokio::test]
async fn keep_auth_conflicts_with_in_place() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_conflict");
    let deps = restore_deps(&cluster);
    let error = restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: std::env::temp_dir(),
            in_place: true,
            keep_auth: true,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: false,
        },
    )
    .await
    .expect_err("conflicting flags");
    assert_eq!(error.code, ErrorCode::invalid_input());
    Ok(())
}

#[tokio::test]
async fn missing_backup_fails_the_restore() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_missing");
    let deps = restore_deps(&cluster);
    let error = restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("ghost").expect("name"),
            temp_dir: std::env::temp_dir(),
            in_place: true,
            keep_auth: false,
            seeds: Vec::new(),
            use_sstableloader: false,
            verify: false,
        },
    )
    .await
    .expect_err("missing backup");
    assert!(error.is_not_found());
    Ok(())
}

#[tokio::test]
async fn seed_wait_gives_up_after_max_attempts() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("restore_seeds");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"rows")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    let temp = std::env::temp_dir().join(format!("ringvault_restore_{}", uuid::Uuid::new_v4()));
    let deps = restore_deps(&cluster);
    // No host is ever up, so the three attempts run dry.
    let error = restore_node(
        &ctx,
        &deps,
        RestoreNodeInput {
            backup_name: BackupName::parse("bk1").expect("name"),
            temp_dir: temp,
            in_place: true,
            keep_auth: false,
            seeds: vec!["seed1".to_owned()],
            use_sstableloader: false,
            verify: false,
        },
    )
    .await
    .expect_err("seeds never come up");
    assert_eq!(error.code, ErrorCode::timeout());
    Ok(())
}

fn seed_cluster_backup(cluster: &common::TestCluster, name: &str, hosts: &[(&str, &str)]) {
    let mut tokenmap = TokenMap::new();
    for (host, token) in hosts {
        tokenmap.insert(
            (*host).to_owned(),
            RingEntry {
                tokens: vec![(*token).to_owned()],
                is_up: true,
            },
        );
    }
    let tokenmap_json = tokenmap.to_json().expect("tokenmap json");
    cluster
        .storage
        .seed(
            &format!("index/backup_index/{name}/tokenmap_{}.json", hosts[0].0),
            tokenmap_json.as_bytes(),
        )
        .expect("seed tokenmap");
    for (host, _) in hosts {
        cluster
            .storage
            .seed(
                &format!("index/backup_index/{name}/manifest_{host}.json"),
                b"[]",
            )
            .expect("seed manifest");
        cluster
            .storage
            .seed(
                &format!("index/backup_index/{name}/finished_{host}_1700000100.timestamp"),
                b"",
            )
            .expect("seed finished");
    }
}

fn cluster_deps(
    cluster: &common::TestCluster,
    remote: &FakeRemote,
    prompt_answer: bool,
) -> (RestoreClusterDeps, Arc<ScriptedPrompt>) {
    let prompt = Arc::new(ScriptedPrompt::new(prompt_answer));
    let deps = RestoreClusterDeps {
        catalog: cluster.catalog.clone(),
        cassandra: cluster.cassandra.clone(),
        remote: Arc::new(remote.clone()),
        prompt: prompt.clone(),
        logger: Arc::new(NullLogger) as Arc<dyn LoggerPort>,
        stop_command: "systemctl stop cassandra".to_owned(),
        poll_interval: Duration::from_millis(5),
    };
    (deps, prompt)
}

#[tokio::test]
async fn host_list_restore_runs_seeds_before_others() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("cluster_stages");
    seed_cluster_backup(&cluster, "bkc", &[("n1", "100"), ("n4", "200")]);

    let remote = FakeRemote::new();
    let (deps, _prompt) = cluster_deps(&cluster, &remote, true);
    let input = RestoreClusterInput {
        backup_name: BackupName::parse("bkc").expect("name"),
        targets: RestoreTargets::HostList("100,True,n1,n1\n200,False,n3,n4\n".to_owned()),
        temp_dir: "/tmp".into(),
        keep_auth: false,
        use_sstableloader: false,
        bypass_checks: true,
        verify: false,
        host_file_separator: ",".to_owned(),
    };

    let report = restore_cluster(&ctx, &deps, input).await?;
    assert!(report.is_success());
    assert_eq!(report.finished.len(), 2);

    // Every target was stopped first.
    let stop_hosts: BTreeSet<String> = remote
        .commands()
        .into_iter()
        .map(|(host, _)| host)
        .collect();
    assert_eq!(
        stop_hosts,
        ["n1", "n3"].iter().map(|s| (*s).to_owned()).collect()
    );

    // The seed stage ran first; the follower got the seed list and a
    // source fqdn differing from its target.
    let supervised = remote.supervised();
    assert_eq!(supervised.len(), 2);
    assert_eq!(supervised[0].0, "n1");
    assert!(supervised[0].2.contains("--in-place"));
    assert_eq!(supervised[1].0, "n3");
    assert!(supervised[1].2.contains("--fqdn n4"));
    assert!(supervised[1].2.contains("--seeds n1"));
    Ok(())
}

#[tokio::test]
async fn broken_remote_is_reported_with_its_stderr() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("cluster_broken");
    seed_cluster_backup(&cluster, "bkc", &[("n1", "100")]);

    let remote = FakeRemote::new();
    remote.script_statuses(
        "n1",
        &[RemoteStatus::Running, RemoteStatus::Broken { exit_code: 3 }],
    );
    remote.script_stderr("n1", "disk full");

    let (deps, _prompt) = cluster_deps(&cluster, &remote, true);
    let input = RestoreClusterInput {
        backup_name: BackupName::parse("bkc").expect("name"),
        targets: RestoreTargets::HostList("100,True,n1,n1\n".to_owned()),
        temp_dir: "/tmp".into(),
        keep_auth: false,
        use_sstableloader: false,
        bypass_checks: true,
        verify: false,
        host_file_separator: ",".to_owned(),
    };

    let report = restore_cluster(&ctx, &deps, input).await?;
    assert!(!report.is_success());
    assert_eq!(
        report.broken,
        vec![("n1".to_owned(), 3, "disk full".to_owned())]
    );
    Ok(())
}

#[tokio::test]
async fn cluster_verification_runs_once_every_host_finished() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("cluster_verify");
    write_sstables(
        &cluster.data_root,
        "shop",
        "orders-abc123",
        &[("na-1-big-Data.db", b"rows")],
    );
    run_backup(&ctx, &cluster, "bk1", BackupMode::Full).await?;

    let remote = FakeRemote::new();
    let (deps, _prompt) = cluster_deps(&cluster, &remote, true);
    let input = RestoreClusterInput {
        backup_name: BackupName::parse("bk1").expect("name"),
        targets: RestoreTargets::HostList("100,True,n1,n1\n".to_owned()),
        temp_dir: "/tmp".into(),
        keep_auth: false,
        use_sstableloader: false,
        bypass_checks: true,
        verify: true,
        host_file_separator: ",".to_owned(),
    };
    let report = restore_cluster(&ctx, &deps, input.clone()).await?;
    assert!(report.is_success());

    // Corrupting the data makes the verified restore fail.
    cluster
        .storage
        .truncate_by_one("n1/bk1/data/shop/orders-abc123/na-1-big-Data.db")?;
    let error = restore_cluster(&ctx, &deps, input)
        .await
        .expect_err("verification must flag the corruption");
    assert_eq!(error.code, ErrorCode::integrity());
    Ok(())
}

#[tokio::test]
async fn operator_refusal_aborts_before_any_remote_command() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("cluster_refused");
    seed_cluster_backup(&cluster, "bkc", &[("n1", "100")]);

    let remote = FakeRemote::new();
    let (deps, prompt) = cluster_deps(&cluster, &remote, false);
    let input = RestoreClusterInput {
        backup_name: BackupName::parse("bkc").expect("name"),
        targets: RestoreTargets::HostList("100,True,n1,n1\n".to_owned()),
        temp_dir: "/tmp".into(),
        keep_auth: false,
        use_sstableloader: false,
        bypass_checks: false,
        verify: false,
        host_file_separator: ",".to_owned(),
    };

    let error = restore_cluster(&ctx, &deps, input)
        .await
        .expect_err("operator said no");
    assert!(error.is_cancelled());
    assert_eq!(prompt.asked().len(), 1);
    assert!(remote.commands().is_empty());
    assert!(remote.supervised().is_empty());
    Ok(())
}

#[tokio::test]
async fn unmapped_backup_host_fails_the_plan() -> Result<()> {
    let ctx = RequestContext::new_op();
    let cluster = single_node("cluster_unmapped");
    seed_cluster_backup(&cluster, "bkc", &[("n1", "100"), ("n2", "200")]);

    let remote = FakeRemote::new();
    let (deps, _prompt) = cluster_deps(&cluster, &remote, true);
    let input = RestoreClusterInput {
        backup_name: BackupName::parse("bkc").expect("name"),
        targets: RestoreTargets::HostList("100,True,n1,n1\n".to_owned()),
        temp_dir: "/tmp".into(),
        keep_auth: false,
        use_sstableloader: false,
        bypass_checks: true,
        verify: false,
        host_file_separator: ",".to_owned(),
    };

    let error = restore_cluster(&ctx, &deps, input)
        .await
        .expect_err("n2 has no target");
    assert_eq!(error.code, ErrorCode::topology_mismatch());
    Ok(())
}
