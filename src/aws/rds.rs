//! RDS instance and snapshot management
//!
//! [`RdsOperations`] is the narrow capability surface the orchestrator
//! needs; [`RdsClient`] implements it over the AWS SDK. The domain structs
//! keep SDK types out of the orchestration logic so it can be exercised
//! against mocks.

use anyhow::{Context, Result};
use aws_sdk_rds::types as rds_types;
use aws_sdk_rds::Client;
use tracing::debug;

use crate::aws::context::AwsContext;
use crate::aws::error::AwsError;
use crate::tags::Tag;

/// The subset of DB instance state the orchestrator acts on
#[derive(Debug, Clone)]
pub struct DbInstance {
    pub identifier: String,
    pub status: Option<String>,
    pub tags: Vec<Tag>,
}

/// The subset of DB snapshot state the orchestrator acts on
#[derive(Debug, Clone)]
pub struct DbSnapshot {
    pub identifier: String,
    pub arn: Option<String>,
    pub status: Option<String>,
    pub tags: Vec<Tag>,
}

/// Parameters for restoring a DB instance from a snapshot
#[derive(Debug, Clone)]
pub struct RestoreFromSnapshotRequest {
    /// Snapshot ARN or identifier to restore from
    pub snapshot: String,
    /// Identifier for the new DB instance
    pub instance_identifier: String,
    pub instance_class: String,
    pub subnet_group_name: String,
    pub vpc_security_group_ids: Vec<String>,
    pub parameter_group_name: Option<String>,
    pub option_group_name: Option<String>,
    pub tags: Vec<Tag>,
}

/// RDS operations the orchestrator depends on.
///
/// Kept to exactly the calls cavalier makes so the orchestration logic can
/// be unit tested against a mock instead of a monkey-patched SDK client.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on the trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait RdsOperations: Send + Sync {
    /// Describe a single DB instance by identifier.
    ///
    /// Errors if the service reports anything other than exactly one
    /// matching instance.
    async fn describe_instance(&self, identifier: &str) -> Result<DbInstance>;

    /// Take a snapshot of `source_identifier` named `snapshot_identifier`.
    async fn create_snapshot(
        &self,
        source_identifier: &str,
        snapshot_identifier: &str,
        tags: Vec<Tag>,
    ) -> Result<()>;

    /// List manual snapshots with the given identifier, following pagination.
    async fn describe_snapshots(&self, snapshot_identifier: &str) -> Result<Vec<DbSnapshot>>;

    /// Restore a new DB instance from a snapshot.
    async fn restore_from_snapshot(
        &self,
        request: RestoreFromSnapshotRequest,
    ) -> Result<DbInstance>;

    /// Set the master password and disable backup retention, applying
    /// immediately.
    async fn modify_instance(&self, identifier: &str, master_user_password: &str) -> Result<()>;

    /// Delete a DB instance, skipping the final snapshot and removing
    /// automated backups.
    async fn delete_instance(&self, identifier: &str) -> Result<()>;

    /// Delete a DB snapshot.
    async fn delete_snapshot(&self, snapshot_identifier: &str) -> Result<()>;
}

/// RDS client for managing cavalier DB instances and snapshots
pub struct RdsClient {
    client: Client,
}

impl RdsClient {
    /// Create an RDS client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.rds_client(),
        }
    }
}

impl RdsOperations for RdsClient {
    async fn describe_instance(&self, identifier: &str) -> Result<DbInstance> {
        let response = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("describing the DB instance '{identifier}'"))?;

        let instances = response.db_instances();
        if instances.len() != 1 {
            anyhow::bail!(
                "expected exactly one DB instance named '{identifier}', got {}",
                instances.len()
            );
        }

        Ok(convert_instance(&instances[0]))
    }

    async fn create_snapshot(
        &self,
        source_identifier: &str,
        snapshot_identifier: &str,
        tags: Vec<Tag>,
    ) -> Result<()> {
        self.client
            .create_db_snapshot()
            .db_instance_identifier(source_identifier)
            .db_snapshot_identifier(snapshot_identifier)
            .set_tags(Some(tags.iter().map(convert_tag_to_sdk).collect()))
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("creating the DB snapshot '{snapshot_identifier}'"))?;

        Ok(())
    }

    async fn describe_snapshots(&self, snapshot_identifier: &str) -> Result<Vec<DbSnapshot>> {
        let mut stream = self
            .client
            .describe_db_snapshots()
            .db_snapshot_identifier(snapshot_identifier)
            .snapshot_type("manual")
            .into_paginator()
            .items()
            .send();

        let mut snapshots = Vec::new();
        while let Some(item) = stream.next().await {
            let snapshot = item
                .map_err(AwsError::from_sdk)
                .with_context(|| format!("describing the DB snapshot '{snapshot_identifier}'"))?;
            snapshots.push(convert_snapshot(&snapshot));
        }

        debug!(
            snapshot = %snapshot_identifier,
            count = snapshots.len(),
            "Described manual DB snapshots"
        );

        Ok(snapshots)
    }

    async fn restore_from_snapshot(
        &self,
        request: RestoreFromSnapshotRequest,
    ) -> Result<DbInstance> {
        let response = self
            .client
            .restore_db_instance_from_db_snapshot()
            .db_snapshot_identifier(&request.snapshot)
            .db_instance_identifier(&request.instance_identifier)
            .db_instance_class(&request.instance_class)
            .db_subnet_group_name(&request.subnet_group_name)
            .set_vpc_security_group_ids(Some(request.vpc_security_group_ids.clone()))
            .set_db_parameter_group_name(request.parameter_group_name.clone())
            .set_option_group_name(request.option_group_name.clone())
            .enable_iam_database_authentication(true)
            .publicly_accessible(false)
            .auto_minor_version_upgrade(false)
            .multi_az(false)
            .set_tags(Some(request.tags.iter().map(convert_tag_to_sdk).collect()))
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| {
                format!(
                    "restoring the DB instance '{}' from '{}'",
                    request.instance_identifier, request.snapshot
                )
            })?;

        let instance = response
            .db_instance()
            .with_context(|| "no DB instance in the restore response")?;

        Ok(convert_instance(instance))
    }

    async fn modify_instance(&self, identifier: &str, master_user_password: &str) -> Result<()> {
        self.client
            .modify_db_instance()
            .db_instance_identifier(identifier)
            .apply_immediately(true)
            .backup_retention_period(0)
            .master_user_password(master_user_password)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("modifying the DB instance '{identifier}'"))?;

        Ok(())
    }

    async fn delete_instance(&self, identifier: &str) -> Result<()> {
        self.client
            .delete_db_instance()
            .db_instance_identifier(identifier)
            .delete_automated_backups(true)
            .skip_final_snapshot(true)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("deleting the DB instance '{identifier}'"))?;

        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_identifier: &str) -> Result<()> {
        self.client
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_identifier)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("deleting the DB snapshot '{snapshot_identifier}'"))?;

        Ok(())
    }
}

fn convert_instance(instance: &rds_types::DbInstance) -> DbInstance {
    DbInstance {
        identifier: instance.db_instance_identifier().unwrap_or_default().to_string(),
        status: instance.db_instance_status().map(str::to_string),
        tags: convert_tags_from_sdk(instance.tag_list()),
    }
}

fn convert_snapshot(snapshot: &rds_types::DbSnapshot) -> DbSnapshot {
    DbSnapshot {
        identifier: snapshot.db_snapshot_identifier().unwrap_or_default().to_string(),
        arn: snapshot.db_snapshot_arn().map(str::to_string),
        status: snapshot.status().map(str::to_string),
        tags: convert_tags_from_sdk(snapshot.tag_list()),
    }
}

fn convert_tags_from_sdk(tags: &[rds_types::Tag]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|t| match (t.key(), t.value()) {
            (Some(key), Some(value)) => Some(Tag::new(key, value)),
            _ => None,
        })
        .collect()
}

fn convert_tag_to_sdk(tag: &Tag) -> rds_types::Tag {
    rds_types::Tag::builder()
        .key(&tag.key)
        .value(&tag.value)
        .build()
}
