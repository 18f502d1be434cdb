//! The cavalier: snapshot, restore, modify, and terminate orchestration
//!
//! Each public operation is a short linear sequence of RDS / Secrets
//! Manager calls interleaved with waits for asynchronous transitions. Any
//! step's error aborts the remaining sequence; no rollback is attempted,
//! this is a test-environment tool. Destructive and mutating steps are
//! gated on the ownership tag so the tool can never touch infrastructure
//! it did not create.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aws::error::{self, AwsError};
use crate::aws::rds::{DbInstance, DbSnapshot, RdsOperations, RestoreFromSnapshotRequest};
use crate::aws::secrets::{secret_name, SecretsOperations};
use crate::config::Config;
use crate::error::CavalierError;
use crate::password::PasswordGenerator;
use crate::tags::{self, Tag};
use crate::wait::{self, ErrorDisposition, PollOutcome, WaitConfig};

/// Statuses that end an availability wait as a failure
const DB_FAILED_STATES: &[&str] = &[
    "deleted",
    "deleting",
    "failed",
    "incompatible-restore",
    "incompatible-parameters",
];

/// Pauses after issuing an asynchronous mutation, before polling for its
/// effect, to avoid racing eventual consistency.
#[derive(Debug, Clone)]
pub struct SettleConfig {
    /// Pause between issuing a delete and polling for deletion
    pub after_delete: Duration,
    /// Pause between issuing a modification and polling for availability
    pub after_modify: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            after_delete: Duration::from_secs(10),
            after_modify: Duration::from_secs(30),
        }
    }
}

/// Orchestrates the lifecycle of a disposable DB instance.
pub struct Cavalier<R, S> {
    cfg: Config,
    rds: R,
    secrets: S,
    password: PasswordGenerator,
    wait: WaitConfig,
    settle: SettleConfig,
    cancel: CancellationToken,
}

impl<R: RdsOperations, S: SecretsOperations> Cavalier<R, S> {
    pub fn new(cfg: Config, rds: R, secrets: S, password: PasswordGenerator) -> Self {
        Self {
            cfg,
            rds,
            secrets,
            password,
            wait: WaitConfig::default(),
            settle: SettleConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use the caller's cancellation token for waits and settle delays.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_settle_config(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Take a DB snapshot of the source instance, named after the target
    /// instance and linked to it by tag, and wait until it is available.
    pub async fn handle_snapshot(&self) -> Result<()> {
        let source = self
            .cfg
            .source
            .source_instance_identifier
            .as_deref()
            .context("a source DB instance identifier is required to take a snapshot")?;
        let snapshot_id = tags::snapshot_name(&self.cfg.db.instance_identifier);

        info!(source = %source, snapshot = %snapshot_id, "Taking a DB snapshot...");

        let snapshot_tags = vec![
            Tag::new(
                tags::TAG_INSTANCE_IDENTIFIER,
                &self.cfg.db.instance_identifier,
            ),
            Tag::new(tags::TAG_CREATED_AT, tags::format_created_at(Utc::now())),
        ];

        self.rds
            .create_snapshot(source, &snapshot_id, snapshot_tags)
            .await?;

        info!("Waiting for the snapshot to be available...");
        self.wait_for_snapshot_available(&snapshot_id).await?;

        info!(snapshot = %snapshot_id, "The DB snapshot has been created.");
        Ok(())
    }

    /// Restore a new DB instance from a snapshot (taking one first if the
    /// configuration asks for it), then modify it for testing.
    pub async fn handle_restore(&self) -> Result<()> {
        let snapshot = if self.cfg.source.take_snapshot {
            self.handle_snapshot().await?;

            // resolve the ARN of the snapshot we just took
            let snapshot = self
                .find_linked_snapshot(&self.cfg.db.instance_identifier)
                .await?;
            match snapshot.arn {
                Some(arn) => arn,
                None => anyhow::bail!("the DB snapshot '{}' has no ARN", snapshot.identifier),
            }
        } else {
            self.cfg
                .source
                .snapshot_arn
                .clone()
                .context("a snapshot ARN is required when no snapshot is taken")?
        };

        let mut restore_tags = vec![
            Tag::new(tags::TAG_CREATED_BY, "true"),
            Tag::new(tags::TAG_CREATED_AT, tags::format_created_at(Utc::now())),
        ];
        if self.cfg.source.take_snapshot {
            restore_tags.push(Tag::new(tags::TAG_USES_CAVALIER_SNAPSHOT, "true"));
        }

        info!(snapshot = %snapshot, "Restoring a DB instance...");

        let instance = self
            .rds
            .restore_from_snapshot(RestoreFromSnapshotRequest {
                snapshot,
                instance_identifier: self.cfg.db.instance_identifier.clone(),
                instance_class: self.cfg.db.instance_class.clone(),
                subnet_group_name: self.cfg.db.subnet_group_name.clone(),
                vpc_security_group_ids: self.cfg.db.vpc_security_group_ids.clone(),
                parameter_group_name: self.cfg.db.parameter_group_name.clone(),
                option_group_name: self.cfg.db.option_group_name.clone(),
                tags: restore_tags,
            })
            .await?;

        info!(
            "Waiting for the DB instance to be up and running... It may take more than 10 minutes."
        );
        self.wait_for_instance_available(&instance.identifier)
            .await?;

        info!(instance = %instance.identifier, "The DB instance has been created.");

        self.handle_modify().await
    }

    /// Rotate (or reuse) the master user password and disable backups on a
    /// cavalier-owned instance.
    pub async fn handle_modify(&self) -> Result<()> {
        let instance = self
            .owned_instance(&self.cfg.db.instance_identifier)
            .await?;

        info!("Checking whether the DB instance is available...");
        self.wait_for_instance_available(&instance.identifier)
            .await?;

        info!("Generating a new master user password...");
        let generated = self.password.generate();

        let secret = secret_name(&self.cfg.secrets_prefix, &instance.identifier);
        let master_user_password = match self.secrets.create_secret(&secret, &generated).await {
            Ok(arn) => {
                info!(secret = %arn, "A new master user password has been saved");
                generated
            }
            Err(e) if error::find(&e).is_some_and(AwsError::is_already_exists) => {
                info!("The master user password already exists. Reusing it.");
                self.secrets
                    .get_secret(&secret)
                    .await
                    .context("getting the existing master user password")?
            }
            Err(e) => return Err(e.context("creating the master user password")),
        };

        info!(instance = %instance.identifier, "Modifying the DB instance for the testing...");
        self.rds
            .modify_instance(&instance.identifier, &master_user_password)
            .await?;

        // the modification is itself asynchronous
        self.settle(self.settle.after_modify).await?;
        self.wait_for_instance_available(&instance.identifier)
            .await?;

        info!("The DB instance has been modified.");
        Ok(())
    }

    /// Delete a cavalier-owned instance along with its secret and, when it
    /// was restored from a cavalier-managed snapshot, that snapshot.
    pub async fn handle_terminate(&self) -> Result<()> {
        let identifier = self.cfg.db.instance_identifier.clone();

        // instance tags drive the snapshot cleanup; None once the instance
        // is already gone
        let mut instance_tags: Option<Vec<Tag>> = None;

        match self.rds.describe_instance(&identifier).await {
            Ok(instance) => {
                // refuse to terminate anything cavalier did not create
                if !tags::is_created_by_cavalier(&instance.tags) {
                    return Err(CavalierError::NotCreatedByCavalier { identifier }.into());
                }
                instance_tags = Some(instance.tags);

                info!(instance = %identifier, "Terminating the DB instance...");
                self.delete_db_instance(&identifier).await?;
                info!(instance = %identifier, "The DB instance has been terminated");
            }
            Err(e) if error::find(&e).is_some_and(AwsError::is_instance_not_found) => {
                info!(instance = %identifier, "The DB instance is already deleted.");
            }
            Err(e) => return Err(e),
        }

        let secret = secret_name(&self.cfg.secrets_prefix, &identifier);
        self.secrets
            .delete_secret(&secret)
            .await
            .context("deleting the master user password secret")?;
        info!("The master user password for the DB instance has been deleted.");

        self.cleanup_snapshot(&identifier, instance_tags.as_deref())
            .await
    }

    /// Issue the delete and wait until the instance is gone.
    async fn delete_db_instance(&self, identifier: &str) -> Result<()> {
        match self.rds.delete_instance(identifier).await {
            Ok(()) => {}
            Err(e) if error::find(&e).is_some_and(AwsError::is_instance_not_found) => {
                info!("The DB instance is already deleted.");
                return Ok(());
            }
            Err(e) if error::find(&e).is_some_and(AwsError::is_invalid_state) => {
                // assumed to mean deletion is already in progress; if the
                // state had a different cause the wait below times out
                debug!(instance = %identifier, "Delete refused by the instance state, assuming it is already transitioning");
            }
            Err(e) => return Err(e),
        }

        info!("Waiting for the DB instance to be deleted...");
        self.settle(self.settle.after_delete).await?;
        self.wait_for_instance_deleted(identifier).await
    }

    /// Delete the linked snapshot if there is one and the instance used it.
    async fn cleanup_snapshot(
        &self,
        identifier: &str,
        instance_tags: Option<&[Tag]>,
    ) -> Result<()> {
        let snapshot = match self.find_linked_snapshot(identifier).await {
            Ok(snapshot) => snapshot,
            Err(e) if snapshot_absent(&e) => {
                info!("There is no corresponding DB snapshot.");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // with the instance still present, only remove the snapshot it was
        // actually restored from; once the instance is gone its tags are
        // unavailable and the snapshot's own link tag decides
        if let Some(instance_tags) = instance_tags {
            if !tags::uses_cavalier_snapshot(instance_tags) {
                info!("The DB instance does not use a snapshot created by the cavalier.");
                return Ok(());
            }
        }

        info!(snapshot = %snapshot.identifier, "Removing the corresponding DB snapshot...");
        self.rds.delete_snapshot(&snapshot.identifier).await?;
        info!("The corresponding DB snapshot has been removed.");

        Ok(())
    }

    /// Describe the instance and fail closed unless it carries the
    /// ownership tag.
    async fn owned_instance(&self, identifier: &str) -> Result<DbInstance> {
        let instance = self.rds.describe_instance(identifier).await?;

        if !tags::is_created_by_cavalier(&instance.tags) {
            return Err(CavalierError::NotCreatedByCavalier {
                identifier: identifier.to_string(),
            }
            .into());
        }

        Ok(instance)
    }

    /// Find the manual snapshot with the deterministic name whose link tag
    /// points back at the instance.
    async fn find_linked_snapshot(&self, identifier: &str) -> Result<DbSnapshot> {
        let name = tags::snapshot_name(identifier);
        let snapshots = self.rds.describe_snapshots(&name).await?;

        snapshots
            .into_iter()
            .find(|s| tags::is_snapshot_linked_to(identifier, &s.tags))
            .ok_or_else(|| {
                CavalierError::NoLinkedSnapshot {
                    identifier: identifier.to_string(),
                }
                .into()
            })
    }

    async fn wait_for_instance_available(&self, identifier: &str) -> Result<()> {
        let rds = &self.rds;
        wait::wait_until(
            &self.wait,
            &self.cancel,
            &format!("DB instance '{identifier}'"),
            || async move {
                let instance = rds.describe_instance(identifier).await?;
                Ok(availability_outcome(instance.status.as_deref()))
            },
            wait::retry_on_throttle,
        )
        .await
        .map_err(anyhow::Error::from)
    }

    async fn wait_for_instance_deleted(&self, identifier: &str) -> Result<()> {
        let rds = &self.rds;
        wait::wait_until(
            &self.wait,
            &self.cancel,
            &format!("deletion of DB instance '{identifier}'"),
            || async move {
                let instance = rds.describe_instance(identifier).await?;
                Ok(match instance.status.as_deref() {
                    Some("deleted") => PollOutcome::Ready,
                    _ => PollOutcome::Pending,
                })
            },
            |err| {
                // the instance disappearing is what we are waiting for
                if err.is_instance_not_found() {
                    ErrorDisposition::Ready
                } else if err.is_throttled() {
                    ErrorDisposition::Retry
                } else {
                    ErrorDisposition::Fatal
                }
            },
        )
        .await
        .map_err(anyhow::Error::from)
    }

    async fn wait_for_snapshot_available(&self, snapshot_identifier: &str) -> Result<()> {
        let rds = &self.rds;
        wait::wait_until(
            &self.wait,
            &self.cancel,
            &format!("DB snapshot '{snapshot_identifier}'"),
            || async move {
                let snapshots = rds.describe_snapshots(snapshot_identifier).await?;
                Ok(match snapshots.first() {
                    Some(snapshot) => availability_outcome(snapshot.status.as_deref()),
                    // not visible yet
                    None => PollOutcome::Pending,
                })
            },
            wait::retry_on_throttle,
        )
        .await
        .map_err(anyhow::Error::from)
    }

    /// Pause before polling for the effect of an asynchronous mutation.
    async fn settle(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => {
                warn!("Cancelled while settling");
                Err(CavalierError::Cancelled.into())
            }
        }
    }
}

fn availability_outcome(status: Option<&str>) -> PollOutcome {
    match status {
        Some("available") => PollOutcome::Ready,
        Some(state) if DB_FAILED_STATES.contains(&state) => PollOutcome::Failed(state.to_string()),
        _ => PollOutcome::Pending,
    }
}

/// Snapshot lookups that come back empty are tolerated during cleanup,
/// whether the service faulted or no linked snapshot matched.
fn snapshot_absent(err: &anyhow::Error) -> bool {
    if error::find(err).is_some_and(AwsError::is_snapshot_not_found) {
        return true;
    }

    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<CavalierError>(),
            Some(CavalierError::NoLinkedSnapshot { .. })
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use mockall::Sequence;

    use crate::aws::rds::MockRdsOperations;
    use crate::aws::secrets::MockSecretsOperations;
    use crate::config::{DbConfig, SourceConfig};

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                instance_identifier: "test".to_string(),
                instance_class: "db.t3.medium".to_string(),
                subnet_group_name: "test-subnets".to_string(),
                vpc_security_group_ids: vec!["sg-12345".to_string()],
                parameter_group_name: None,
                option_group_name: None,
            },
            source: SourceConfig::default(),
            secrets_prefix: "secrets-prefix".to_string(),
        }
    }

    fn cavalier(
        cfg: Config,
        rds: MockRdsOperations,
        secrets: MockSecretsOperations,
    ) -> Cavalier<MockRdsOperations, MockSecretsOperations> {
        Cavalier::new(
            cfg,
            rds,
            secrets,
            PasswordGenerator::master_user_password().unwrap(),
        )
        .with_wait_config(WaitConfig {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        })
        .with_settle_config(SettleConfig {
            after_delete: Duration::ZERO,
            after_modify: Duration::ZERO,
        })
    }

    fn owned_instance(status: &str, extra_tags: &[Tag]) -> DbInstance {
        let mut instance_tags = vec![Tag::new(tags::TAG_CREATED_BY, "true")];
        instance_tags.extend_from_slice(extra_tags);

        DbInstance {
            identifier: "test".to_string(),
            status: Some(status.to_string()),
            tags: instance_tags,
        }
    }

    fn linked_snapshot() -> DbSnapshot {
        DbSnapshot {
            identifier: "test-cavalier".to_string(),
            arn: Some("arn:aws:rds:us-east-1:123456789012:snapshot:test-cavalier".to_string()),
            status: Some("available".to_string()),
            tags: vec![Tag::new(tags::TAG_INSTANCE_IDENTIFIER, "test")],
        }
    }

    fn instance_not_found() -> anyhow::Error {
        AwsError::InstanceNotFound("DB instance not found".to_string()).into()
    }

    #[tokio::test]
    async fn test_terminate_propagates_describe_errors() {
        let mut rds = MockRdsOperations::new();
        rds.expect_describe_instance()
            .withf(|id| id == "test")
            .returning(|_| Err(anyhow::anyhow!("describe db instances error")));

        let cv = cavalier(test_config(), rds, MockSecretsOperations::new());
        let err = cv.handle_terminate().await.unwrap_err();
        assert!(err.to_string().contains("describe db instances error"));
    }

    #[tokio::test]
    async fn test_terminate_already_deleted_still_cleans_up() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_describe_instance()
            .times(1)
            .returning(|_| Err(instance_not_found()));

        secrets
            .expect_delete_secret()
            .withf(|name| name == "secrets-prefix/test")
            .times(1)
            .returning(|_| Ok(()));

        rds.expect_describe_snapshots()
            .withf(|name| name == "test-cavalier")
            .times(1)
            .returning(|_| Ok(vec![linked_snapshot()]));

        // the instance is gone, so the snapshot's own link tag decides
        rds.expect_delete_snapshot()
            .withf(|name| name == "test-cavalier")
            .times(1)
            .returning(|_| Ok(()));

        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_already_deleted_keeps_unlinked_snapshot() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_describe_instance()
            .times(1)
            .returning(|_| Err(instance_not_found()));

        secrets
            .expect_delete_secret()
            .times(1)
            .returning(|_| Ok(()));

        // same name, but the link tag names a different instance
        rds.expect_describe_snapshots().times(1).returning(|_| {
            Ok(vec![DbSnapshot {
                tags: vec![Tag::new(tags::TAG_INSTANCE_IDENTIFIER, "someone-else")],
                ..linked_snapshot()
            }])
        });

        // no expect_delete_snapshot: deleting would panic the mock
        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_refuses_unowned_instance() {
        let mut rds = MockRdsOperations::new();

        rds.expect_describe_instance().times(1).returning(|_| {
            Ok(DbInstance {
                identifier: "test".to_string(),
                status: Some("available".to_string()),
                tags: vec![],
            })
        });

        // no delete/secret/snapshot expectations: any such call panics
        let cv = cavalier(test_config(), rds, MockSecretsOperations::new());
        let err = cv.handle_terminate().await.unwrap_err();

        match err.downcast_ref::<CavalierError>() {
            Some(CavalierError::NotCreatedByCavalier { identifier }) => {
                assert_eq!(identifier, "test");
            }
            other => panic!("expected the ownership violation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminate_owned_instance_full_sequence() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();
        let mut seq = Sequence::new();

        rds.expect_describe_instance()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(owned_instance(
                    "available",
                    &[Tag::new(tags::TAG_USES_CAVALIER_SNAPSHOT, "true")],
                ))
            });

        rds.expect_delete_instance()
            .withf(|id| id == "test")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        // the deletion wait polls until the instance disappears
        rds.expect_describe_instance()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(instance_not_found()));

        secrets
            .expect_delete_secret()
            .withf(|name| name == "secrets-prefix/test")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        rds.expect_describe_snapshots()
            .withf(|name| name == "test-cavalier")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![linked_snapshot()]));

        rds.expect_delete_snapshot()
            .withf(|name| name == "test-cavalier")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_keeps_snapshot_when_instance_does_not_use_one() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        let mut describe_calls = 0u32;
        rds.expect_describe_instance().returning(move |_| {
            describe_calls += 1;
            if describe_calls == 1 {
                // owned but restored from a caller-supplied snapshot
                Ok(owned_instance("available", &[]))
            } else {
                Err(instance_not_found())
            }
        });

        rds.expect_delete_instance().times(1).returning(|_| Ok(()));
        secrets
            .expect_delete_secret()
            .times(1)
            .returning(|_| Ok(()));
        rds.expect_describe_snapshots()
            .times(1)
            .returning(|_| Ok(vec![linked_snapshot()]));

        // no expect_delete_snapshot: the usage-link tag is absent
        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_tolerates_invalid_state_on_delete() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        let mut describe_calls = 0u32;
        rds.expect_describe_instance().returning(move |_| {
            describe_calls += 1;
            if describe_calls == 1 {
                Ok(owned_instance("deleting", &[]))
            } else {
                Err(instance_not_found())
            }
        });

        rds.expect_delete_instance().times(1).returning(|_| {
            Err(AwsError::InvalidInstanceState("instance is being deleted".to_string()).into())
        });

        secrets
            .expect_delete_secret()
            .times(1)
            .returning(|_| Ok(()));
        rds.expect_describe_snapshots()
            .times(1)
            .returning(|_| Ok(vec![]));

        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_modify_refuses_unowned_instance() {
        let mut rds = MockRdsOperations::new();

        rds.expect_describe_instance().times(1).returning(|_| {
            Ok(DbInstance {
                identifier: "test".to_string(),
                status: Some("available".to_string()),
                tags: vec![Tag::new(tags::TAG_CREATED_BY, "maybe")],
            })
        });

        let cv = cavalier(test_config(), rds, MockSecretsOperations::new());
        let err = cv.handle_modify().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CavalierError>(),
            Some(CavalierError::NotCreatedByCavalier { .. })
        ));
    }

    #[tokio::test]
    async fn test_modify_stores_generated_password() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("available", &[])));

        let stored = Arc::new(Mutex::new(None::<String>));
        let stored_clone = stored.clone();
        secrets
            .expect_create_secret()
            .withf(|name, _| name == "secrets-prefix/test")
            .times(1)
            .returning(move |_, value| {
                *stored_clone.lock().unwrap() = Some(value.to_string());
                Ok("arn:aws:secretsmanager:us-east-1:123456789012:secret:test".to_string())
            });

        let modified = Arc::new(Mutex::new(None::<String>));
        let modified_clone = modified.clone();
        rds.expect_modify_instance()
            .withf(|id, _| id == "test")
            .times(1)
            .returning(move |_, password| {
                *modified_clone.lock().unwrap() = Some(password.to_string());
                Ok(())
            });

        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_modify().await.unwrap();

        let stored = stored.lock().unwrap().clone().unwrap();
        let modified = modified.lock().unwrap().clone().unwrap();
        assert_eq!(stored, modified);
        assert_eq!(stored.len(), 41);
    }

    #[tokio::test]
    async fn test_modify_reuses_existing_secret() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("available", &[])));

        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _| Err(AwsError::AlreadyExists("secret exists".to_string()).into()));

        secrets
            .expect_get_secret()
            .withf(|name| name == "secrets-prefix/test")
            .times(1)
            .returning(|_| Ok("the-stored-password".to_string()));

        // the stored value, not a freshly generated one, reaches the modify
        rds.expect_modify_instance()
            .withf(|id, password| id == "test" && password == "the-stored-password")
            .times(1)
            .returning(|_, _| Ok(()));

        let cv = cavalier(test_config(), rds, secrets);
        cv.handle_modify().await.unwrap();
    }

    #[tokio::test]
    async fn test_modify_propagates_other_secret_errors() {
        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("available", &[])));

        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("access denied")));

        let cv = cavalier(test_config(), rds, secrets);
        let err = cv.handle_modify().await.unwrap_err();
        assert!(format!("{err:#}").contains("access denied"));
    }

    #[tokio::test]
    async fn test_restore_from_supplied_snapshot_arn() {
        let mut cfg = test_config();
        cfg.source.snapshot_arn =
            Some("arn:aws:rds:us-east-1:123456789012:snapshot:prod".to_string());

        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_restore_from_snapshot()
            .withf(|request| {
                request.snapshot == "arn:aws:rds:us-east-1:123456789012:snapshot:prod"
                    && request.instance_identifier == "test"
                    && request.instance_class == "db.t3.medium"
                    && request.subnet_group_name == "test-subnets"
                    && request.vpc_security_group_ids == ["sg-12345"]
                    && request
                        .tags
                        .contains(&Tag::new(tags::TAG_CREATED_BY, "true"))
                    // no snapshot was taken, so no usage-link tag
                    && !request
                        .tags
                        .iter()
                        .any(|t| t.key == tags::TAG_USES_CAVALIER_SNAPSHOT)
            })
            .times(1)
            .returning(|_| Ok(owned_instance("creating", &[])));

        // availability waits during restore, plus the ownership check and
        // waits of the chained modify
        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("available", &[])));

        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _| Ok("arn".to_string()));
        rds.expect_modify_instance()
            .times(1)
            .returning(|_, _| Ok(()));

        let cv = cavalier(cfg, rds, secrets);
        cv.handle_restore().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_takes_snapshot_when_source_instance_given() {
        let mut cfg = test_config();
        cfg.source.source_instance_identifier = Some("prod-db".to_string());
        cfg.source.take_snapshot = true;

        let mut rds = MockRdsOperations::new();
        let mut secrets = MockSecretsOperations::new();

        rds.expect_create_snapshot()
            .withf(|source, name, snapshot_tags| {
                source == "prod-db"
                    && name == "test-cavalier"
                    && snapshot_tags.contains(&Tag::new(tags::TAG_INSTANCE_IDENTIFIER, "test"))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        // serves both the snapshot-available wait and the ARN resolution
        rds.expect_describe_snapshots()
            .withf(|name| name == "test-cavalier")
            .returning(|_| Ok(vec![linked_snapshot()]));

        rds.expect_restore_from_snapshot()
            .withf(|request| {
                request.snapshot == "arn:aws:rds:us-east-1:123456789012:snapshot:test-cavalier"
                    && request
                        .tags
                        .contains(&Tag::new(tags::TAG_CREATED_BY, "true"))
                    && request
                        .tags
                        .contains(&Tag::new(tags::TAG_USES_CAVALIER_SNAPSHOT, "true"))
            })
            .times(1)
            .returning(|_| Ok(owned_instance("creating", &[])));

        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("available", &[])));

        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _| Ok("arn".to_string()));
        rds.expect_modify_instance()
            .times(1)
            .returning(|_, _| Ok(()));

        let cv = cavalier(cfg, rds, secrets);
        cv.handle_restore().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_waits_until_available() {
        let mut cfg = test_config();
        cfg.source.source_instance_identifier = Some("prod-db".to_string());

        let mut rds = MockRdsOperations::new();

        rds.expect_create_snapshot()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut describe_calls = 0u32;
        rds.expect_describe_snapshots().returning(move |_| {
            describe_calls += 1;
            let status = if describe_calls < 3 {
                "creating"
            } else {
                "available"
            };
            Ok(vec![DbSnapshot {
                status: Some(status.to_string()),
                ..linked_snapshot()
            }])
        });

        let cv = cavalier(cfg, rds, MockSecretsOperations::new());
        cv.handle_snapshot().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_fails_when_instance_enters_failed_state() {
        let mut cfg = test_config();
        cfg.source.snapshot_arn = Some("arn:prod".to_string());

        let mut rds = MockRdsOperations::new();

        rds.expect_restore_from_snapshot()
            .times(1)
            .returning(|_| Ok(owned_instance("creating", &[])));

        rds.expect_describe_instance()
            .returning(|_| Ok(owned_instance("incompatible-restore", &[])));

        let cv = cavalier(cfg, rds, MockSecretsOperations::new());
        let err = cv.handle_restore().await.unwrap_err();
        assert!(err.to_string().contains("incompatible-restore"));
    }

    #[tokio::test]
    async fn test_created_at_tag_never_grants_ownership() {
        let mut rds = MockRdsOperations::new();

        rds.expect_describe_instance().times(1).returning(|_| {
            Ok(DbInstance {
                identifier: "test".to_string(),
                status: Some("available".to_string()),
                tags: vec![Tag::new(tags::TAG_CREATED_AT, "2024-01-01T00:00:00+00:00")],
            })
        });

        let cv = cavalier(test_config(), rds, MockSecretsOperations::new());
        let err = cv.handle_terminate().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CavalierError>(),
            Some(CavalierError::NotCreatedByCavalier { .. })
        ));
    }
}
