//! Secrets Manager storage for master user passwords
//!
//! One secret per managed instance, named `<prefix>/<instance-id>`. Create
//! reports "already exists" as a classified fault so the orchestrator can
//! fall back to reusing the stored value; delete is force-without-recovery
//! and tolerates the secret already being absent, since this is disposable
//! test infrastructure.

use anyhow::{Context, Result};
use aws_sdk_secretsmanager::Client;
use tracing::debug;

use crate::aws::context::AwsContext;
use crate::aws::error::AwsError;

/// Description attached to every secret cavalier creates
const SECRET_DESCRIPTION: &str =
    "Randomly generated master user password for an RDS DB instance (by cavalier)";

/// Name of the secret holding the master password for a DB instance.
pub fn secret_name(prefix: &str, instance_identifier: &str) -> String {
    format!("{prefix}/{instance_identifier}")
}

/// Secrets Manager operations the orchestrator depends on.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on the trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait SecretsOperations: Send + Sync {
    /// Store a new secret; returns its ARN. Faults with
    /// [`AwsError::AlreadyExists`] when a secret of that name exists.
    async fn create_secret(&self, name: &str, value: &str) -> Result<String>;

    /// Fetch the current value of a secret.
    async fn get_secret(&self, name: &str) -> Result<String>;

    /// Force-delete a secret without a recovery window. A secret that is
    /// already absent is treated as success.
    async fn delete_secret(&self, name: &str) -> Result<()>;
}

/// Secrets Manager client for cavalier master user passwords
pub struct SecretsClient {
    client: Client,
}

impl SecretsClient {
    /// Create a Secrets Manager client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.secrets_client(),
        }
    }
}

impl SecretsOperations for SecretsClient {
    async fn create_secret(&self, name: &str, value: &str) -> Result<String> {
        let response = self
            .client
            .create_secret()
            .name(name)
            .description(SECRET_DESCRIPTION)
            .secret_string(value)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("creating the secret '{name}'"))?;

        response
            .arn()
            .map(str::to_string)
            .with_context(|| "no ARN in the create-secret response")
    }

    async fn get_secret(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(AwsError::from_sdk)
            .with_context(|| format!("getting the secret '{name}'"))?;

        response
            .secret_string()
            .map(str::to_string)
            .with_context(|| format!("the secret '{name}' holds no string value"))
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        let result = self
            .client
            .delete_secret()
            .secret_id(name)
            .force_delete_without_recovery(true)
            .send()
            .await
            .map_err(AwsError::from_sdk);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_secret_not_found() => {
                debug!(secret = %name, "Secret already absent");
                Ok(())
            }
            Err(e) => {
                Err(anyhow::Error::new(e).context(format!("deleting the secret '{name}'")))
            }
        }
    }
}
