//! End-to-end resolution and install flow, headless: local assets on disk,
//! the content cache, and the session's fallback behavior.

use modelview::resolve::{AssetReference, Resolver, ResolverConfig, UnresolvedAssetError};
use modelview::resolve::LoadAttempt;
use modelview::viewer::{NoticeSeverity, ViewerSession};

const CUBE_OBJ: &str = "\
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
f 1 2 3
f 1 3 4
f 5 6 7
f 5 7 8
";

fn resolver_with_assets(dir: &std::path::Path) -> Resolver {
    let mut config = ResolverConfig::new("https://app.example.com/proxy");
    config.provider_hosts = vec!["models.provider.ai".to_string()];
    config.asset_root = dir.to_path_buf();
    Resolver::new(config)
}

#[tokio::test]
async fn local_asset_resolves_loads_and_displays() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cube.obj"), CUBE_OBJ).unwrap();
    let resolver = resolver_with_assets(dir.path());

    let reference = AssetReference::new("cube.obj");
    let blob = resolver.resolve(&reference).await.unwrap();
    assert_eq!(blob.content_type, "model/obj");

    let mut session = ViewerSession::new(resolver);
    let token = session.begin_request();
    assert!(session.install_fetched(token, reference.as_str(), Ok(blob)));
    assert!(!session.showing_placeholder());
    assert!(session.notice().is_none());

    // Canonical framing: the cube spans two units and sits at the origin.
    let aabb = session.active_scene().unwrap().aabb();
    assert!((aabb.max_dimension() - 2.0).abs() < 1e-4);
    assert!(aabb.center().x.abs() < 1e-4);
}

#[tokio::test]
async fn second_resolve_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cube.obj"), CUBE_OBJ).unwrap();
    let resolver = resolver_with_assets(dir.path());

    let reference = AssetReference::new("cube.obj");
    resolver.resolve(&reference).await.unwrap();
    assert!(resolver.is_cached(&reference));

    // With the file gone, only the cache can satisfy this.
    std::fs::remove_file(dir.path().join("cube.obj")).unwrap();
    let blob = resolver.resolve(&reference).await.unwrap();
    assert_eq!(blob.data.as_ref(), CUBE_OBJ.as_bytes());

    // Explicit clear is the only eviction; afterwards the fetch fails again.
    resolver.clear_cache();
    assert!(!resolver.is_cached(&reference));
    assert!(resolver.resolve(&reference).await.is_err());
}

#[tokio::test]
async fn exhausted_strategies_report_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver_with_assets(dir.path());

    let err = resolver
        .resolve(&AssetReference::new("missing.glb"))
        .await
        .unwrap_err();
    assert_eq!(err.attempts.len(), 1);
    assert_eq!(err.attempts[0].strategy, "local-file");
}

#[test]
fn unreachable_remote_falls_back_to_placeholder_and_banner() {
    let resolver = Resolver::new(ResolverConfig::new("https://app.example.com/proxy"));
    let mut session = ViewerSession::new(resolver);

    let token = session.begin_request();
    let err = UnresolvedAssetError {
        reference: "https://unreachable.example/out.glb".to_string(),
        attempts: vec![
            LoadAttempt {
                strategy: "direct",
                outcome: "transport failed: connection refused".to_string(),
            },
            LoadAttempt {
                strategy: "proxy",
                outcome: "proxy rejected fetch with status 502: upstream down".to_string(),
            },
        ],
    };
    session.install_fetched(token, "https://unreachable.example/out.glb", Err(err));

    assert!(session.showing_placeholder());
    let notice = session.notice().expect("dismissible banner");
    assert_eq!(notice.severity, NoticeSeverity::Warning);
    assert!(notice.dismissible);

    // Dismissing keeps the placeholder interactive with no notice.
    session.dismiss_notice();
    assert!(session.notice().is_none());
    assert!(session.showing_placeholder());
}

#[test]
fn newer_request_wins_over_stale_resolution() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.obj"), CUBE_OBJ).unwrap();
    std::fs::write(dir.path().join("b.obj"), CUBE_OBJ).unwrap();
    let resolver = resolver_with_assets(dir.path());
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let blob_a = runtime
        .block_on(resolver.resolve(&AssetReference::new("a.obj")))
        .unwrap();
    let blob_b = runtime
        .block_on(resolver.resolve(&AssetReference::new("b.obj")))
        .unwrap();

    let mut session = ViewerSession::new(resolver);
    let token_a = session.begin_request();
    let token_b = session.begin_request();

    // b's resolution lands first, then a's stale one arrives.
    assert!(session.install_fetched(token_b, "b.obj", Ok(blob_b)));
    assert!(!session.install_fetched(token_a, "a.obj", Ok(blob_a)));
    assert_eq!(session.active_scene().unwrap().label(), "b.obj");
}
