//! cavalier - disposable RDS DB instances for testing
//!
//! Clones a production database into a disposable RDS instance so tests can
//! run against real data, and tears everything down afterwards. Four
//! operations: snapshot, restore, modify, terminate. Every instance and
//! snapshot the tool creates is tagged, and destructive operations refuse
//! to touch anything that does not carry the ownership tag.

pub mod aws;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod password;
pub mod tags;
pub mod wait;

pub use error::CavalierError;
pub use orchestrator::Cavalier;
