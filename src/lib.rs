//! IAM core for an S3-compatible object storage server: an in-process
//! identity authority consumed as a library by the surrounding server.
//! Owns identity/group/policy state, the coarse store lock, the fine
//! identity cache, the authorization evaluator and the bootstrap/watcher
//! sequence. Session-token *signing* is provided as a pluggable seam
//! (`token::ClaimsSigner`); verification and the wire protocol around
//! requests are out of scope — see [`evaluator::AuthArgs`] for the
//! boundary this crate actually owns.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod evaluator;
mod orchestrator;
pub mod ready;
pub mod store;
pub mod sys;
pub mod token;

pub use bootstrap::{DistributedLock, LocalDistributedLock, WatchEvent};
pub use config::Config;
pub use error::{IamError, IamResult};
pub use evaluator::{AuthArgs, ExternalPolicyEvaluator};
pub use orchestrator::{NewServiceAccountOpts, UpdateServiceAccountOpts};
pub use sys::IamSys;
