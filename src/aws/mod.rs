//! AWS service adapters

pub mod context;
pub mod error;
pub mod rds;
pub mod secrets;

pub use context::AwsContext;
pub use rds::{RdsClient, RdsOperations};
pub use secrets::{SecretsClient, SecretsOperations};
