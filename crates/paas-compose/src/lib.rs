//! # paas-compose
//!
//! Turns a compose file plus registered addons into an immutable release
//! bundle.
//!
//! ```text
//! compose.yaml ──► magic substitution ──► addon merge ──► PreparedCompose
//!                                                            │
//!            releases/<app>/<release_id>/ ◄── write_bundle ◄─┘
//!              compose.yaml, compose.addon.*.yaml,
//!              compose.files, .env, metadata.json
//! ```

pub mod addons;
pub mod bundle;
pub mod commands;
pub mod magic;
pub mod prune;
pub mod resolver;
pub mod runtime_env;

pub use addons::{AddonRecord, AddonStore, NewAddon, MERGE_STRATEGY};
pub use bundle::{
    bundle_sha256, list_releases, load_bundle, new_release_id, write_bundle, BundleRef,
    ReleaseMetadata, METADATA_FILE,
};
pub use magic::MagicVars;
pub use prune::{prune, PruneOptions, PruneReport};
pub use resolver::{prepare, PrepareOptions, PreparedCompose, BASE_COMPOSE};
pub use runtime_env::{
    materialize_runtime_env, project_env, read_manifest, secret_key_name, EnvScope, MANIFEST_FILE,
    RUNTIME_ENV_FILE,
};
