//! End-to-end: manifest on disk, engine run against a scratch cache root.

use camino::Utf8PathBuf;
use envy::{Cache, Engine, Manifest, PkgKind};
use std::fs;
use tempfile::TempDir;

fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

fn write_payload(dir: &TempDir) -> Utf8PathBuf {
    let payload = utf8(dir, "vendor/toolkit");
    fs::create_dir_all(payload.join("bin")).unwrap();
    fs::write(payload.join("bin/toolkit"), b"#!/bin/sh\necho toolkit\n").unwrap();
    fs::write(payload.join("VERSION"), b"1.0").unwrap();
    payload
}

#[test]
fn manifest_to_published_packages() {
    let dir = TempDir::new().unwrap();
    write_payload(&dir);

    let manifest_path = utf8(&dir, "envy.toml");
    fs::write(
        &manifest_path,
        r#"
        [[package]]
        identity = "sync.toolkit@v1"
        source = "vendor/toolkit"

        [[package]]
        identity = "sync.toolkit@v1"
        source = "vendor/toolkit"
        options = { variant = "debug" }
        "#,
    )
    .unwrap();

    let manifest = Manifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.packages.len(), 2);

    let cache = Cache::new(Some(utf8(&dir, "cache"))).unwrap();
    let results = Engine::new(cache, None).run(&manifest.packages).unwrap();

    // Same identity, different options: two distinct cache entries.
    assert_eq!(results.len(), 2);
    assert!(results.contains_key("sync.toolkit@v1"));
    assert!(results.contains_key(r#"sync.toolkit@v1{variant="debug"}"#));

    let plain = &results["sync.toolkit@v1"];
    let variant = &results[r#"sync.toolkit@v1{variant="debug"}"#];
    assert_eq!(plain.kind, PkgKind::CacheManaged);
    assert_eq!(variant.kind, PkgKind::CacheManaged);
    assert_ne!(plain.pkg_path, variant.pkg_path);

    for result in [plain, variant] {
        let pkg = result.pkg_path.clone().unwrap();
        assert!(pkg.join("toolkit/VERSION").exists());
        assert!(Cache::is_entry_complete(pkg.parent().unwrap()));
    }
}

#[test]
fn manifest_discovery_walks_up() {
    let dir = TempDir::new().unwrap();
    let manifest_path = utf8(&dir, "envy.toml");
    fs::write(&manifest_path, "").unwrap();

    let nested = utf8(&dir, "a/b/c");
    fs::create_dir_all(&nested).unwrap();
    assert_eq!(Manifest::discover(&nested).unwrap(), manifest_path);
}

#[test]
fn cache_root_metadata_is_honored() {
    let dir = TempDir::new().unwrap();
    let manifest_path = utf8(&dir, "envy.toml");
    fs::write(
        &manifest_path,
        r#"
        [envy]
        cache_root = "/var/cache/envy-test"
        "#,
    )
    .unwrap();

    let manifest = Manifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.cache_root.as_deref().unwrap(), "/var/cache/envy-test");
}
