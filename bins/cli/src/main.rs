//! CLI binary entrypoint.

mod commands;
mod error;
mod format;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{
    run_backup, run_build_index, run_download, run_fetch_tokenmap, run_get_last_complete,
    run_list_backups, run_purge, run_report_last_backup, run_restore_cluster, run_restore_node,
    run_status, run_verify,
};
use error::CliError;
use format::OutputFormat;
use ringvault_config::{load_config, ConfigOverrides};
use ringvault_domain::BackupMode;
use ringvault_infra::AppContext;
use ringvault_shared::RequestContext;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "ringvault",
    version,
    about = "Cassandra cluster backup and restore",
    long_about = None
)]
struct Cli {
    /// Config file path (defaults to /etc/ringvault/ringvault.toml).
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Act as another host.
    #[arg(long, global = true)]
    fqdn: Option<String>,

    /// Bucket name override.
    #[arg(long, global = true)]
    bucket_name: Option<String>,

    /// Storage prefix override.
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Credentials key file override.
    #[arg(long, global = true)]
    key_file: Option<String>,

    /// SSH user name override.
    #[arg(long, global = true)]
    ssh_username: Option<String>,

    /// SSH key file override.
    #[arg(long, global = true)]
    ssh_key_file: Option<String>,

    /// Verbosity (repeat for debug logging).
    #[arg(short = 'v', long = "verbosity", action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// Output rendering.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackupModeArg {
    /// Self-contained backup under its own prefix.
    Full,
    /// Backup sharing the per-node data pool.
    Incremental,
}

impl From<BackupModeArg> for BackupMode {
    fn from(value: BackupModeArg) -> Self {
        match value {
            BackupModeArg::Full => Self::Full,
            BackupModeArg::Incremental => Self::Incremental,
        }
    }
}

impl std::fmt::Display for BackupModeArg {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => formatter.write_str("full"),
            Self::Incremental => formatter.write_str("incremental"),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Backup this Cassandra node.
    Backup {
        /// Custom name for the backup.
        #[arg(long)]
        backup_name: Option<String>,
        /// Wait up to this many seconds for the ring predecessor.
        #[arg(long)]
        stagger: Option<u64>,
        /// Backup mode.
        #[arg(long, value_enum, default_value_t = BackupModeArg::Full)]
        mode: BackupModeArg,
    },
    /// List backups.
    ListBackups {
        /// List every backup in the bucket, not just this node's.
        #[arg(long)]
        show_all: bool,
    },
    /// Show the status of one backup.
    Status {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
    },
    /// Verify the integrity of one backup.
    Verify {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
    },
    /// Download a backup into a local directory.
    Download {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
        /// Existing directory to download into.
        #[arg(long)]
        download_destination: PathBuf,
    },
    /// Restore this node from a backup.
    RestoreNode {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
        /// Directory for temporary storage.
        #[arg(long, default_value = "/tmp")]
        temp_dir: PathBuf,
        /// The backup was taken on this very node.
        #[arg(long)]
        in_place: bool,
        /// Keep system_auth as found on the node.
        #[arg(long)]
        keep_auth: bool,
        /// Seed hosts to wait for before starting Cassandra.
        #[arg(long)]
        seeds: Option<String>,
        /// Load through sstableloader instead of moving files.
        #[arg(long)]
        use_sstableloader: bool,
        /// Verify the backup after the restore completes.
        #[arg(long)]
        verify: bool,
    },
    /// Restore a whole cluster from a backup.
    RestoreCluster {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
        /// Seed of the target cluster (in-place restore).
        #[arg(long, conflicts_with = "host_list")]
        seed_target: Option<String>,
        /// Host-list file (out-of-place restore).
        #[arg(long)]
        host_list: Option<PathBuf>,
        /// Directory for temporary storage on the targets.
        #[arg(long, default_value = "/tmp")]
        temp_dir: PathBuf,
        /// Keep system_auth as found on the targets.
        #[arg(long)]
        keep_auth: bool,
        /// Bypass the interactive confirmation.
        #[arg(short = 'y', long)]
        bypass_checks: bool,
        /// Load through sstableloader on the targets.
        #[arg(long)]
        use_sstableloader: bool,
        /// Verify the backup once every host has restored.
        #[arg(long)]
        verify: bool,
    },
    /// Rebuild the backup index from storage.
    BuildIndex {
        /// Compute and print the index without uploading.
        #[arg(long)]
        noop: bool,
    },
    /// Delete obsolete backups per the configured retention.
    Purge,
    /// Print the tokenmap recorded with a backup.
    FetchTokenmap {
        /// Backup name.
        #[arg(long)]
        backup_name: String,
    },
    /// Print time since the last backup.
    ReportLastBackup {
        /// Also push the information as metrics.
        #[arg(long)]
        push_metrics: bool,
    },
    /// Print the name of the latest complete cluster backup.
    GetLastCompleteClusterBackup,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            std::process::ExitCode::from(error.exit_code().as_u8())
        },
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let overrides = ConfigOverrides {
        bucket_name: cli.bucket_name.clone(),
        prefix: cli.prefix.clone(),
        key_file: cli.key_file.clone(),
        fqdn: cli.fqdn.clone(),
        ssh_username: cli.ssh_username.clone(),
        ssh_key_file: cli.ssh_key_file.clone(),
    };
    let config = load_config(cli.config_file.as_deref(), &overrides)?;
    let app = AppContext::build(config, cli.verbosity > 0).await?;
    let ctx = RequestContext::new_op();
    let output = cli.output;

    match cli.command {
        Commands::Backup {
            backup_name,
            stagger,
            mode,
        } => {
            run_backup(
                &ctx,
                &app,
                backup_name.as_deref(),
                stagger,
                mode.into(),
                output,
            )
            .await
        },
        Commands::ListBackups { show_all } => run_list_backups(&ctx, &app, show_all, output).await,
        Commands::Status { backup_name } => run_status(&ctx, &app, &backup_name, output).await,
        Commands::Verify { backup_name } => run_verify(&ctx, &app, &backup_name, output).await,
        Commands::Download {
            backup_name,
            download_destination,
        } => run_download(&ctx, &app, &backup_name, &download_destination, output).await,
        Commands::RestoreNode {
            backup_name,
            temp_dir,
            in_place,
            keep_auth,
            seeds,
            use_sstableloader,
            verify,
        } => {
            run_restore_node(
                &ctx,
                &app,
                &backup_name,
                &temp_dir,
                in_place,
                keep_auth,
                seeds.as_deref(),
                use_sstableloader,
                verify,
                output,
            )
            .await
        },
        Commands::RestoreCluster {
            backup_name,
            seed_target,
            host_list,
            temp_dir,
            keep_auth,
            bypass_checks,
            use_sstableloader,
            verify,
        } => {
            run_restore_cluster(
                &ctx,
                &app,
                &backup_name,
                seed_target.as_deref(),
                host_list.as_deref(),
                &temp_dir,
                keep_auth,
                bypass_checks,
                use_sstableloader,
                verify,
                output,
            )
            .await
        },
        Commands::BuildIndex { noop } => run_build_index(&ctx, &app, noop, output).await,
        Commands::Purge => run_purge(&ctx, &app, output).await,
        Commands::FetchTokenmap { backup_name } => {
            run_fetch_tokenmap(&ctx, &app, &backup_name, output).await
        },
        Commands::ReportLastBackup { push_metrics } => {
            run_report_last_backup(&ctx, &app, push_metrics, output).await
        },
        Commands::GetLastCompleteClusterBackup => run_get_last_complete(&ctx, &app, output).await,
    }
}
