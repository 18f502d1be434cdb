//! cavalier: disposable RDS DB instances cloned from production snapshots
//!
//! Command-line tool that snapshots a running RDS instance, restores the
//! snapshot into a disposable test instance with a rotated master password,
//! and terminates everything it created - and only what it created.

use anyhow::{Context, Result};
use clap::{ArgGroup, Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cavalier::aws::{AwsContext, RdsClient, SecretsClient};
use cavalier::config::{Config, DbConfig, SourceConfig, DEFAULT_DB_INSTANCE_CLASS, DEFAULT_SECRETS_PREFIX};
use cavalier::password::PasswordGenerator;
use cavalier::Cavalier;

#[derive(Parser, Debug)]
#[command(name = "cavalier")]
#[command(about = "Database testing with snapshots taken by Amazon RDS")]
#[command(version)]
struct Cli {
    /// AWS region (defaults to the SDK's resolution chain)
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long, global = true)]
    aws_profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a DB snapshot of a running DB instance
    Snapshot(SnapshotArgs),

    /// Restore a DB instance from a DB snapshot
    Restore(Box<RestoreArgs>),

    /// Modify the existing DB instance created by the cavalier
    Modify(InstanceArgs),

    /// Terminate the DB instance created by the cavalier
    Terminate(InstanceArgs),
}

/// Arguments shared by the operations that only target an existing instance
#[derive(ClapArgs, Debug)]
struct InstanceArgs {
    /// DB instance identifier
    #[arg(long)]
    db_instance_identifier: String,

    /// Secrets Manager prefix storing the master user password
    #[arg(long, default_value = DEFAULT_SECRETS_PREFIX)]
    secrets_manager_prefix: String,
}

#[derive(ClapArgs, Debug)]
struct SnapshotArgs {
    /// DB instance identifier the snapshot is taken for
    #[arg(long)]
    db_instance_identifier: String,

    /// Source DB instance identifier to take the snapshot of
    #[arg(long)]
    source_db_instance_identifier: String,

    /// Secrets Manager prefix storing the master user password
    #[arg(long, default_value = DEFAULT_SECRETS_PREFIX)]
    secrets_manager_prefix: String,
}

#[derive(ClapArgs, Debug)]
#[command(group(
    ArgGroup::new("snapshot_source")
        .required(true)
        .args(["snapshot_arn", "source_db_instance_identifier"]),
))]
struct RestoreArgs {
    /// DB instance identifier for the restored instance
    #[arg(long)]
    db_instance_identifier: String,

    /// Snapshot ARN to restore from
    #[arg(long)]
    snapshot_arn: Option<String>,

    /// Source DB instance to snapshot first, then restore from
    #[arg(long)]
    source_db_instance_identifier: Option<String>,

    /// DB instance class
    #[arg(long, default_value = DEFAULT_DB_INSTANCE_CLASS)]
    db_instance_class: String,

    /// DB subnet group
    #[arg(long)]
    db_subnet_group: String,

    /// Comma-separated VPC security group IDs
    #[arg(long = "vpc-security-groups", value_delimiter = ',', required = true)]
    vpc_security_group_ids: Vec<String>,

    /// DB parameter group
    #[arg(long)]
    db_parameter_group: Option<String>,

    /// Option group name
    #[arg(long)]
    option_group: Option<String>,

    /// Secrets Manager prefix to store the master user password
    #[arg(long, default_value = DEFAULT_SECRETS_PREFIX)]
    secrets_manager_prefix: String,

    /// Print what would happen without calling AWS
    #[arg(long)]
    dry_run: bool,
}

impl From<&RestoreArgs> for Config {
    fn from(args: &RestoreArgs) -> Self {
        Self {
            db: DbConfig {
                instance_identifier: args.db_instance_identifier.clone(),
                instance_class: args.db_instance_class.clone(),
                subnet_group_name: args.db_subnet_group.clone(),
                vpc_security_group_ids: args.vpc_security_group_ids.clone(),
                parameter_group_name: args.db_parameter_group.clone(),
                option_group_name: args.option_group.clone(),
            },
            source: SourceConfig {
                snapshot_arn: args.snapshot_arn.clone(),
                source_instance_identifier: args.source_db_instance_identifier.clone(),
                // a source instance means we must take the snapshot ourselves
                take_snapshot: args.source_db_instance_identifier.is_some(),
            },
            secrets_prefix: args.secrets_manager_prefix.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print the error and its cause chain in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // abort waits and in-flight polls on Ctrl-C
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting...");
                cancel.cancel();
            }
        });
    }

    if let Some(profile) = &cli.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }

    let (config, dry_run) = match &cli.command {
        Command::Snapshot(args) => {
            let mut config =
                Config::for_instance(&args.db_instance_identifier, &args.secrets_manager_prefix);
            config.source.source_instance_identifier =
                Some(args.source_db_instance_identifier.clone());
            (config, false)
        }
        Command::Restore(args) => (Config::from(args.as_ref()), args.dry_run),
        Command::Modify(args) | Command::Terminate(args) => (
            Config::for_instance(&args.db_instance_identifier, &args.secrets_manager_prefix),
            false,
        ),
    };

    if dry_run {
        print_restore_plan(&config);
        return Ok(());
    }

    let aws = AwsContext::new(cli.region.as_deref(), cli.aws_profile.as_deref()).await;
    let password = PasswordGenerator::master_user_password()
        .context("initializing the master user password generator")?;

    let cv = Cavalier::new(
        config,
        RdsClient::from_context(&aws),
        SecretsClient::from_context(&aws),
        password,
    )
    .with_cancellation(cancel);

    match cli.command {
        Command::Snapshot(_) => cv
            .handle_snapshot()
            .await
            .map_err(|e| e.context("failed to take the DB snapshot")),
        Command::Restore(_) => cv
            .handle_restore()
            .await
            .map_err(|e| e.context("failed to restore the DB instance")),
        Command::Modify(_) => cv
            .handle_modify()
            .await
            .map_err(|e| e.context("failed to modify the DB instance")),
        Command::Terminate(_) => cv
            .handle_terminate()
            .await
            .map_err(|e| e.context("failed to terminate the DB instance")),
    }
}

/// Print what a restore invocation would do, without calling AWS
fn print_restore_plan(config: &Config) {
    println!("\n=== DRY RUN ===\n");
    println!("This would restore the following DB instance:\n");
    println!("  Instance identifier: {}", config.db.instance_identifier);
    println!("  Instance class:      {}", config.db.instance_class);
    println!("  Subnet group:        {}", config.db.subnet_group_name);
    println!(
        "  Security groups:     {}",
        config.db.vpc_security_group_ids.join(", ")
    );
    if let Some(group) = &config.db.parameter_group_name {
        println!("  Parameter group:     {group}");
    }
    if let Some(group) = &config.db.option_group_name {
        println!("  Option group:        {group}");
    }
    println!();
    match (&config.source.snapshot_arn, &config.source.source_instance_identifier) {
        (Some(arn), _) => println!("  Restoring from the existing snapshot: {arn}"),
        (None, Some(source)) => println!(
            "  Taking a snapshot of '{source}' first, then restoring from it"
        ),
        (None, None) => {}
    }
    println!("  Secrets Manager prefix: {}", config.secrets_prefix);
    println!();
    println!("To run for real, remove the --dry-run flag.");
}
