use chrono::{TimeDelta, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

use paas_compose::{
    load_bundle, materialize_runtime_env, new_release_id, prepare, prune, write_bundle,
    secret_key_name, AddonStore, EnvScope, NewAddon, PrepareOptions, PruneOptions, BASE_COMPOSE,
    MANIFEST_FILE, RUNTIME_ENV_FILE,
};
use paas_core::{ContextPaths, ErrorKind, PaasError, StateRoot};
use tempfile::TempDir;

struct Fixture {
    temp_dir: TempDir,
    ctx: ContextPaths,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StateRoot::new(temp_dir.path().join("state"))
            .context("default")
            .unwrap();
        Self { temp_dir, ctx }
    }

    fn write(&self, name: &str, body: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn options(&self, compose: PathBuf) -> PrepareOptions {
        let now = Utc::now();
        PrepareOptions {
            app: "billing-api".into(),
            context: "default".into(),
            release_id: new_release_id(now),
            strategy: "rolling".into(),
            targets: vec!["edge-a".into()],
            compose_file: compose,
            now,
        }
    }

    async fn add_addon(&self, name: &str, body: &str) {
        let fragment = self.write(&format!("{}.fragment.yaml", name), body);
        AddonStore::new(&self.ctx)
            .add(NewAddon {
                app: "billing-api".into(),
                name: name.into(),
                pack: "test".into(),
                fragment,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_addon_with_existing_service_conflicts() {
    let fx = Fixture::new();
    let compose = fx.write("compose.yaml", "services:\n  api:\n    image: api:1\n");
    fx.add_addon("shadow", "services:\n  api:\n    image: other\n")
        .await;

    let addons = AddonStore::new(&fx.ctx).list("billing-api").await.unwrap();
    let err = prepare(&fx.options(compose), &addons).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddonMergeConflict);
    match err {
        PaasError::AddonMergeConflict {
            addon,
            section,
            key,
        } => {
            assert_eq!(addon, "shadow");
            assert_eq!(section, "services");
            assert_eq!(key, "api");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_sidecar_addon_merges_into_bundle() {
    let fx = Fixture::new();
    let compose = fx.write(
        "compose.yaml",
        "services:\n  api:\n    image: ${SI_PAAS_APP}:{{paas.release}}\n",
    );
    fx.add_addon(
        "sidecar",
        "services:\n  sidecar:\n    image: busybox\n    command: echo ${SI_PAAS_APP}\n",
    )
    .await;

    let opts = fx.options(compose);
    let addons = AddonStore::new(&fx.ctx).list("billing-api").await.unwrap();
    let prepared = prepare(&opts, &addons).await.unwrap();
    assert_eq!(
        prepared.compose_files,
        vec!["compose.yaml", "compose.addon.sidecar.yaml"]
    );
    assert!(prepared
        .resolved_compose
        .contains(&format!("billing-api:{}", opts.release_id)));

    let bundle = write_bundle(&fx.ctx, &prepared, &[], BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(bundle.metadata.addon_count, 1);
    assert_eq!(bundle.metadata.release_id, opts.release_id);
    assert!(bundle.dir.join("compose.addon.sidecar.yaml").exists());
    assert_eq!(
        std::fs::read_to_string(bundle.dir.join(MANIFEST_FILE)).unwrap(),
        "compose.yaml\ncompose.addon.sidecar.yaml\n"
    );
    let sidecar = std::fs::read_to_string(bundle.dir.join("compose.addon.sidecar.yaml")).unwrap();
    assert!(sidecar.contains("echo billing-api"));
}

#[tokio::test]
async fn test_bundle_roundtrip_preserves_compose_hash() {
    let fx = Fixture::new();
    let compose = fx.write(
        "compose.yaml",
        "services:\n  api:\n    image: api:1\n    environment:\n      - DB_URL=${DB_URL}\n",
    );
    let prepared = prepare(&fx.options(compose), &[]).await.unwrap();
    let bundle = write_bundle(
        &fx.ctx,
        &prepared,
        &["DB_URL=postgres://db/app".to_string()],
        BTreeMap::from([("vault_trusted".to_string(), "false".to_string())]),
    )
    .await
    .unwrap();

    let loaded = load_bundle(&fx.ctx, "billing-api", bundle.release_id())
        .await
        .unwrap();
    assert_eq!(loaded.metadata, bundle.metadata);
    assert_eq!(loaded.metadata.compose_sha256, prepared.compose_sha256);
    assert_eq!(
        std::fs::read_to_string(loaded.dir.join(BASE_COMPOSE)).unwrap(),
        prepared.resolved_compose
    );
    assert_eq!(loaded.metadata.runtime_env_keys, vec!["DB_URL"]);

    // Bundles are immutable: the same release id cannot be written twice
    let err = write_bundle(&fx.ctx, &prepared, &[], BTreeMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    std::fs::write(loaded.dir.join(RUNTIME_ENV_FILE), "DB_URL=tampered\n").unwrap();
    let err = load_bundle(&fx.ctx, "billing-api", bundle.release_id())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BundleCorrupt);
}

#[tokio::test]
async fn test_namespaced_secret_projects_into_runtime_env() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    std::fs::write(
        dir.join("compose.yaml"),
        "services:\n  auth:\n    environment:\n      GOOGLE: ${RM_GOTRUE_EXTERNAL_GOOGLE_ENABLED}\n",
    )
    .unwrap();

    let keys = materialize_runtime_env(
        dir,
        &["compose.yaml".to_string()],
        &["PAAS__CTX_DEFAULT__NS_DEFAULT__APP_RM__TARGET_VANGUARDA__VAR_RM_GOTRUE_EXTERNAL_GOOGLE_ENABLED=true".to_string()],
        &EnvScope::new("default", "rm", &["vanguarda"]),
    )
    .await
    .unwrap();

    assert_eq!(keys, vec!["RM_GOTRUE_EXTERNAL_GOOGLE_ENABLED"]);
    assert_eq!(
        std::fs::read_to_string(dir.join(RUNTIME_ENV_FILE)).unwrap(),
        "RM_GOTRUE_EXTERNAL_GOOGLE_ENABLED=true\n"
    );
}

#[tokio::test]
async fn test_unresolved_reference_removes_stale_env() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    std::fs::write(
        dir.join("compose.yaml"),
        "services:\n  api:\n    environment:\n      REQUIRED: ${REQUIRED_VALUE}\n",
    )
    .unwrap();
    std::fs::write(dir.join(RUNTIME_ENV_FILE), "STALE=1\n").unwrap();

    let scope = EnvScope::new("default", "api", &["edge-a"]);
    let keys = materialize_runtime_env(dir, &["compose.yaml".to_string()], &[], &scope)
        .await
        .unwrap();
    assert!(keys.is_empty());
    assert!(!dir.join(RUNTIME_ENV_FILE).exists());
}

#[tokio::test]
async fn test_other_app_secret_is_not_projected() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    std::fs::write(
        dir.join("compose.yaml"),
        "services:\n  api:\n    environment:\n      DB: ${DB_URL}\n      REGION: ${REGION}\n",
    )
    .unwrap();

    let env = vec![
        format!("{}=postgres://billing", secret_key_name("default", Some("default"), "billing-api", "edge-a", "DB_URL")),
        format!("{}=postgres://other-target", secret_key_name("default", Some("default"), "rm", "edge-b", "DB_URL")),
        format!("{}=sa-east", secret_key_name("default", Some("default"), "rm", "edge-a", "REGION")),
    ];
    let keys = materialize_runtime_env(
        dir,
        &["compose.yaml".to_string()],
        &env,
        &EnvScope::new("default", "rm", &["edge-a"]),
    )
    .await
    .unwrap();

    assert_eq!(keys, vec!["REGION"]);
    let written = std::fs::read_to_string(dir.join(RUNTIME_ENV_FILE)).unwrap();
    assert_eq!(written, "REGION=sa-east\n");
    assert!(!written.contains("postgres"));
}

#[tokio::test]
async fn test_prune_keeps_newest_releases() {
    let fx = Fixture::new();
    let compose = fx.write("compose.yaml", "services:\n  api:\n    image: api:1\n");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let prepared = prepare(&fx.options(compose.clone()), &[]).await.unwrap();
        let bundle = write_bundle(&fx.ctx, &prepared, &[], BTreeMap::new())
            .await
            .unwrap();
        ids.push(bundle.metadata.release_id.clone());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let report = prune(
        &fx.ctx,
        &PruneOptions {
            app: Some("billing-api".into()),
            keep: 1,
            events_max_age: Some(TimeDelta::days(30)),
            now: Utc::now(),
        },
    )
    .await
    .unwrap();

    assert_eq!(report.releases_scanned, 3);
    assert_eq!(report.releases_removed.len(), 2);
    assert!(fx.ctx.release_dir("billing-api", &ids[2]).unwrap().exists());
    assert!(!fx.ctx.release_dir("billing-api", &ids[0]).unwrap().exists());

    let audit = std::fs::read_to_string(fx.ctx.events_dir().join("audit.jsonl")).unwrap();
    assert!(audit.contains("deploy prune"));
}
