//! AWS integration tests
//!
//! These tests hit real AWS and are ignored by default. Run them with
//! `cargo test -- --ignored` against an account where you can afford to
//! describe RDS resources; they create nothing.

use cavalier::aws::error::{self, AwsError};
use cavalier::aws::rds::RdsOperations;
use cavalier::aws::secrets::{secret_name, SecretsOperations};
use cavalier::aws::{AwsContext, RdsClient, SecretsClient};

/// An identifier that should never exist in any test account
const NONEXISTENT: &str = "cavalier-integration-test-does-not-exist";

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn test_describe_missing_instance_classifies_as_not_found() {
    let aws = AwsContext::new(None, None).await;
    let rds = RdsClient::from_context(&aws);

    let err = rds
        .describe_instance(NONEXISTENT)
        .await
        .expect_err("the instance must not exist");

    let classified = error::find(&err).expect("the fault should be classified");
    assert!(
        classified.is_instance_not_found(),
        "unexpected classification: {classified:?}"
    );
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn test_describe_missing_snapshot_is_tolerable() {
    let aws = AwsContext::new(None, None).await;
    let rds = RdsClient::from_context(&aws);

    // a snapshot lookup either returns an empty page set or a not-found
    // fault; both are tolerated by the terminate cleanup
    match rds.describe_snapshots(NONEXISTENT).await {
        Ok(snapshots) => assert!(snapshots.is_empty()),
        Err(err) => {
            let classified = error::find(&err).expect("the fault should be classified");
            assert!(classified.is_snapshot_not_found());
        }
    }
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn test_delete_missing_secret_is_success() {
    let aws = AwsContext::new(None, None).await;
    let secrets = SecretsClient::from_context(&aws);

    let name = secret_name("cavalier-integration-test", NONEXISTENT);
    secrets
        .delete_secret(&name)
        .await
        .expect("deleting an absent secret is success");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn test_create_get_delete_secret_roundtrip() {
    let aws = AwsContext::new(None, None).await;
    let secrets = SecretsClient::from_context(&aws);

    let name = secret_name("cavalier-integration-test", "roundtrip");

    let arn = secrets
        .create_secret(&name, "integration-test-value")
        .await
        .expect("creating the secret");
    assert!(arn.contains("secretsmanager"));

    // creating again faults with AlreadyExists, the reuse signal
    let err = secrets
        .create_secret(&name, "other-value")
        .await
        .expect_err("the secret already exists");
    assert!(error::find(&err).is_some_and(AwsError::is_already_exists));

    let value = secrets.get_secret(&name).await.expect("getting the secret");
    assert_eq!(value, "integration-test-value");

    secrets
        .delete_secret(&name)
        .await
        .expect("deleting the secret");
}
