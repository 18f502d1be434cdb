//! Configuration for a single cavalier invocation
//!
//! Built by the CLI layer and immutable for the duration of one operation.
//! The restore source invariant (exactly one of snapshot ARN / source
//! instance identifier) is enforced by the CLI before the core runs; the
//! core trusts it.

/// Default DB instance class for restored instances
pub const DEFAULT_DB_INSTANCE_CLASS: &str = "db.t3.medium";

/// Default Secrets Manager name prefix for master user passwords
pub const DEFAULT_SECRETS_PREFIX: &str = "cavalier";

/// Configuration for one orchestrator operation
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub db: DbConfig,
    pub source: SourceConfig,
    /// Secrets Manager name prefix for the master user password secret
    pub secrets_prefix: String,
}

/// The target DB instance and how to shape it on restore
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    /// Identifier of the DB instance cavalier manages
    pub instance_identifier: String,

    /// Instance class for restored instances
    pub instance_class: String,

    /// DB subnet group for restored instances
    pub subnet_group_name: String,

    /// VPC security group IDs for restored instances
    pub vpc_security_group_ids: Vec<String>,

    /// Optional DB parameter group
    pub parameter_group_name: Option<String>,

    /// Optional option group
    pub option_group_name: Option<String>,
}

/// Where the restore's snapshot comes from
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// Existing snapshot to restore from (mutually exclusive with
    /// `source_instance_identifier`)
    pub snapshot_arn: Option<String>,

    /// Running instance to snapshot first (mutually exclusive with
    /// `snapshot_arn`)
    pub source_instance_identifier: Option<String>,

    /// Derived: a snapshot must be taken as part of this invocation
    pub take_snapshot: bool,
}

impl Config {
    /// Minimal configuration for operations that only target an existing
    /// instance (snapshot, modify, terminate).
    pub fn for_instance(
        instance_identifier: impl Into<String>,
        secrets_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db: DbConfig {
                instance_identifier: instance_identifier.into(),
                ..Default::default()
            },
            secrets_prefix: secrets_prefix.into(),
            ..Default::default()
        }
    }
}
