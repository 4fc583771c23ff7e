//! # paas-deploy
//!
//! Ships release bundles to targets.
//!
//! - `transport`: the [`RemoteExecutor`] seam, its ssh/scp implementation and a mock
//! - `apply`: staged upload, promote, compose pull/up and health check on one target
//! - `deploy`: the full pipeline from guardrails to recorded deploy events

pub mod apply;
pub mod deploy;
pub mod transport;

pub use apply::{apply_bundle, remote_release_dir, ApplyOptions, ApplyOutcome};
pub use deploy::{DeployReport, DeployRequest, Deployer, STRATEGIES};
pub use transport::{
    MockCall, MockExecutor, RemoteExecutor, RemoteOutput, SshTransport, SCP_BIN_ENV, SSH_BIN_ENV,
};
