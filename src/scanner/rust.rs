use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use super::{is_ignored_dir, log_parse_failure, read_dependency_file};

pub struct RustScanner;

#[derive(Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<toml::Value>,
}

#[derive(Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
    source: Option<String>,
    checksum: Option<String>,
}

/// Dependencies declared across every `Cargo.toml` in the tree.
#[derive(Default)]
struct Manifests {
    /// name -> requirement, for normal and build dependencies
    normal: BTreeMap<String, String>,
    dev: BTreeMap<String, String>,
}

impl Manifests {
    fn scope_of(&self, name: &str) -> Scope {
        if self.normal.contains_key(name) {
            Scope::Direct
        } else if self.dev.contains_key(name) {
            Scope::Dev
        } else {
            Scope::Transitive
        }
    }
}

#[async_trait]
impl super::Scanner for RustScanner {
    fn id(&self) -> &'static str {
        "rust"
    }

    fn name(&self) -> &'static str {
        "Rust (cargo)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cargo
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["Cargo.toml", "Cargo.lock"]
    }

    fn detect(&self, path: &Path) -> bool {
        path.join("Cargo.toml").is_file()
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let manifests = collect_manifests(path);

        let lock_path = path.join("Cargo.lock");
        if lock_path.is_file() {
            if let Some(content) = read_dependency_file(&lock_path) {
                match toml::from_str::<CargoLock>(&content) {
                    Ok(lock) => return Ok(components_from_lock(lock, &manifests, include_dev)),
                    Err(e) => log_parse_failure(&lock_path, e),
                }
            }
        }

        let mut components: Vec<Component> = manifests
            .normal
            .iter()
            .map(|(name, req)| {
                Component::from_ecosystem(Ecosystem::Cargo, None, name, req).with_scope(Scope::Direct)
            })
            .collect();
        if include_dev {
            components.extend(
                manifests
                    .dev
                    .iter()
                    .filter(|(name, _)| !manifests.normal.contains_key(*name))
                    .map(|(name, req)| {
                        Component::from_ecosystem(Ecosystem::Cargo, None, name, req)
                            .with_scope(Scope::Dev)
                    }),
            );
        }
        Ok(components)
    }
}

fn components_from_lock(lock: CargoLock, manifests: &Manifests, include_dev: bool) -> Vec<Component> {
    let mut components = Vec::new();

    for value in lock.package {
        let pkg: LockedPackage = match value.try_into() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed Cargo.lock package");
                continue;
            }
        };
        // Workspace members have no source.
        if pkg.source.is_none() {
            continue;
        }

        let scope = manifests.scope_of(&pkg.name);
        if scope == Scope::Dev && !include_dev {
            continue;
        }

        let mut component = Component::from_ecosystem(Ecosystem::Cargo, None, &pkg.name, &pkg.version)
            .with_scope(scope);
        if let Some(checksum) = pkg.checksum {
            component = component.with_hash("SHA-256", checksum);
        }
        if let Some(source) = pkg.source.as_deref().and_then(|s| s.strip_prefix("git+")) {
            component = component.with_repository_url(source.to_string());
        }
        components.push(component);
    }

    components
}

fn collect_manifests(root: &Path) -> Manifests {
    let mut manifests = Manifests::default();

    let walker = WalkDir::new(root).max_depth(4).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !e.file_name().to_str().map(is_ignored_dir).unwrap_or(false)
    });

    for entry in walker.flatten() {
        if entry.file_name() != "Cargo.toml" || !entry.file_type().is_file() {
            continue;
        }
        let Some(content) = read_dependency_file(entry.path()) else {
            continue;
        };
        let table = match content.parse::<toml::Table>() {
            Ok(t) => t,
            Err(e) => {
                log_parse_failure(entry.path(), e);
                continue;
            }
        };
        read_manifest(&table, &mut manifests);
    }

    manifests
}

fn read_manifest(table: &toml::Table, manifests: &mut Manifests) {
    let mut sections: Vec<&toml::Table> = vec![table];
    if let Some(targets) = table.get("target").and_then(|v| v.as_table()) {
        sections.extend(targets.values().filter_map(|v| v.as_table()));
    }

    for section in sections {
        for key in ["dependencies", "build-dependencies"] {
            if let Some(deps) = section.get(key).and_then(|v| v.as_table()) {
                manifests.normal.extend(registry_dependencies(deps));
            }
        }
        if let Some(deps) = section.get("dev-dependencies").and_then(|v| v.as_table()) {
            manifests.dev.extend(registry_dependencies(deps));
        }
    }

    if let Some(deps) = table
        .get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|v| v.as_table())
    {
        manifests.normal.extend(registry_dependencies(deps));
    }
}

/// Yields `(crate name, requirement)`, skipping path-only dependencies.
fn registry_dependencies(deps: &toml::Table) -> Vec<(String, String)> {
    deps.iter()
        .filter_map(|(key, spec)| match spec {
            toml::Value::String(req) => Some((key.clone(), req.clone())),
            toml::Value::Table(t) => {
                if t.contains_key("path") && !t.contains_key("version") {
                    return None;
                }
                let name = t
                    .get("package")
                    .and_then(|v| v.as_str())
                    .unwrap_or(key)
                    .to_string();
                let req = t
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("*")
                    .to_string();
                Some((name, req))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use std::fs;

    const CARGO_TOML: &str = r#"
[package]
name = "app"
version = "0.1.0"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
anyhow = "1"
local = { path = "../local" }

[dev-dependencies]
tempfile = "3"
"#;

    const CARGO_LOCK: &str = r#"
version = 3

[[package]]
name = "app"
version = "0.1.0"

[[package]]
name = "anyhow"
version = "1.0.75"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "a4668cab20f66d8d020e1fbc0ebe47217433c1b6c8f2040faf858554e394ace6"

[[package]]
name = "serde"
version = "1.0.190"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "itoa"
version = "1.0.9"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "tempfile"
version = "3.8.1"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "no-version"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

    fn find<'a>(components: &'a [Component], name: &str) -> Option<&'a Component> {
        components.iter().find(|c| c.name() == name)
    }

    #[tokio::test]
    async fn test_lock_versions_win_over_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), CARGO_TOML).unwrap();
        fs::write(dir.path().join("Cargo.lock"), CARGO_LOCK).unwrap();

        let components = RustScanner.scan(dir.path(), false).await.unwrap();

        let anyhow = find(&components, "anyhow").unwrap();
        assert_eq!(anyhow.version(), "1.0.75");
        assert_eq!(anyhow.scope(), Scope::Direct);
        assert_eq!(anyhow.hashes().len(), 1);
        assert_eq!(anyhow.purl(), Some("pkg:cargo/anyhow@1.0.75"));

        assert_eq!(find(&components, "itoa").unwrap().scope(), Scope::Transitive);
        assert!(find(&components, "app").is_none());
        assert!(find(&components, "tempfile").is_none());
        assert!(find(&components, "no-version").is_none());
        assert_eq!(components.len(), 3);
    }

    #[tokio::test]
    async fn test_manifest_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), CARGO_TOML).unwrap();

        let components = RustScanner.scan(dir.path(), true).await.unwrap();
        assert_eq!(find(&components, "serde").unwrap().version(), "1.0");
        assert_eq!(find(&components, "tempfile").unwrap().scope(), Scope::Dev);
        assert!(find(&components, "local").is_none());
    }

    #[tokio::test]
    async fn test_workspace_member_manifests_are_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/core\"]\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("crates/core")).unwrap();
        fs::write(
            dir.path().join("crates/core/Cargo.toml"),
            "[package]\nname = \"core\"\n\n[dependencies]\ntokio = \"1\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(
            dir.path().join("target/debug/Cargo.toml"),
            "[dependencies]\nshould-not-appear = \"1\"\n",
        )
        .unwrap();

        let components = RustScanner.scan(dir.path(), false).await.unwrap();
        assert!(find(&components, "tokio").is_some());
        assert!(find(&components, "should-not-appear").is_none());
    }
}
