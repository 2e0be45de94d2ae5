use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{log_parse_failure, read_dependency_file, split_integrity};

pub struct NodeScanner;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, Value>,
}

impl PackageJson {
    fn declared_scope(&self, name: &str) -> Option<Scope> {
        if self.dependencies.contains_key(name) {
            Some(Scope::Direct)
        } else if self.optional_dependencies.contains_key(name) {
            Some(Scope::Optional)
        } else if self.dev_dependencies.contains_key(name) {
            Some(Scope::Dev)
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageLock {
    #[serde(default)]
    packages: HashMap<String, Value>,
    /// lockfileVersion 1 nests entries under `dependencies`.
    #[serde(default)]
    dependencies: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct LockEntry {
    version: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    integrity: Option<String>,
    resolved: Option<String>,
    license: Option<String>,
    #[serde(default)]
    link: bool,
    #[serde(default)]
    dependencies: HashMap<String, Value>,
}

#[async_trait]
impl super::Scanner for NodeScanner {
    fn id(&self) -> &'static str {
        "node"
    }

    fn name(&self) -> &'static str {
        "Node.js (npm)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["package.json", "package-lock.json"]
    }

    fn detect(&self, path: &Path) -> bool {
        path.join("package.json").is_file()
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let manifest_path = path.join("package.json");
        let manifest = match read_dependency_file(&manifest_path) {
            Some(content) => match serde_json::from_str::<PackageJson>(&content) {
                Ok(m) => m,
                Err(e) => {
                    log_parse_failure(&manifest_path, e);
                    PackageJson::default()
                }
            },
            None => PackageJson::default(),
        };

        let lock_path = path.join("package-lock.json");
        if lock_path.is_file() {
            if let Some(content) = read_dependency_file(&lock_path) {
                match serde_json::from_str::<PackageLock>(&content) {
                    Ok(lock) => return Ok(components_from_lock(&lock, &manifest, include_dev)),
                    Err(e) => log_parse_failure(&lock_path, e),
                }
            }
        }

        Ok(components_from_manifest(&manifest, include_dev))
    }
}

fn components_from_lock(lock: &PackageLock, manifest: &PackageJson, include_dev: bool) -> Vec<Component> {
    let mut components = Vec::new();

    if !lock.packages.is_empty() {
        for (key, value) in &lock.packages {
            // The root project itself is keyed by the empty string.
            if key.is_empty() || !key.contains("node_modules/") {
                continue;
            }
            let entry: LockEntry = match serde_json::from_value(value.clone()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(entry = %key, error = %e, "skipping malformed lock entry");
                    continue;
                }
            };
            if entry.link {
                continue;
            }

            let name = package_name_from_key(key);
            let top_level = key.matches("node_modules/").count() == 1;
            let scope = lock_scope(&entry, manifest, name, top_level);
            if let Some(c) = lock_component(name, &entry, scope, include_dev) {
                components.push(c);
            }
        }
    } else {
        collect_v1(&lock.dependencies, manifest, true, include_dev, &mut components);
    }

    components
}

fn collect_v1(
    deps: &HashMap<String, Value>,
    manifest: &PackageJson,
    top_level: bool,
    include_dev: bool,
    out: &mut Vec<Component>,
) {
    for (name, value) in deps {
        let entry: LockEntry = match serde_json::from_value(value.clone()) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(entry = %name, error = %e, "skipping malformed lock entry");
                continue;
            }
        };
        let scope = lock_scope(&entry, manifest, name, top_level);
        if let Some(c) = lock_component(name, &entry, scope, include_dev) {
            out.push(c);
        }
        collect_v1(&entry.dependencies, manifest, false, include_dev, out);
    }
}

fn lock_scope(entry: &LockEntry, manifest: &PackageJson, name: &str, top_level: bool) -> Scope {
    if top_level {
        if let Some(scope) = manifest.declared_scope(name) {
            return scope;
        }
    }
    if entry.dev {
        Scope::Dev
    } else if entry.optional {
        Scope::Optional
    } else {
        Scope::Transitive
    }
}

fn lock_component(name: &str, entry: &LockEntry, scope: Scope, include_dev: bool) -> Option<Component> {
    if scope == Scope::Dev && !include_dev {
        return None;
    }
    let version = entry.version.as_deref()?;

    let mut component =
        Component::from_ecosystem(Ecosystem::Npm, None, name, version).with_scope(scope);
    if let Some((algorithm, value)) = entry.integrity.as_deref().and_then(split_integrity) {
        component = component.with_hash(algorithm, value);
    }
    if let Some(license) = &entry.license {
        component = component.with_license(license.clone());
    }
    if let Some(resolved) = &entry.resolved {
        component = component.with_repository_url(resolved.clone());
    }
    Some(component)
}

fn components_from_manifest(manifest: &PackageJson, include_dev: bool) -> Vec<Component> {
    let mut components = Vec::new();
    let mut push = |deps: &BTreeMap<String, Value>, scope: Scope| {
        for (name, range) in deps {
            let Some(range) = range.as_str() else {
                tracing::debug!(package = %name, "skipping manifest entry with a non-string version");
                continue;
            };
            components.push(
                Component::from_ecosystem(Ecosystem::Npm, None, name, range).with_scope(scope),
            );
        }
    };

    push(&manifest.dependencies, Scope::Direct);
    push(&manifest.optional_dependencies, Scope::Optional);
    if include_dev {
        push(&manifest.dev_dependencies, Scope::Dev);
    }
    components
}

/// `node_modules/a/node_modules/@scope/b` -> `@scope/b`
fn package_name_from_key(key: &str) -> &str {
    match key.rfind("node_modules/") {
        Some(pos) => &key[pos + "node_modules/".len()..],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use std::fs;

    const PACKAGE_JSON: &str = r#"{
        "name": "web",
        "dependencies": { "express": "^4.18.0", "@babel/core": "~7.23.0" },
        "devDependencies": { "jest": "^29.0.0" }
    }"#;

    const PACKAGE_LOCK: &str = r#"{
        "name": "web",
        "lockfileVersion": 3,
        "packages": {
            "": { "name": "web", "dependencies": { "express": "^4.18.0" } },
            "node_modules/express": {
                "version": "4.18.2",
                "integrity": "sha512-abc",
                "license": "MIT"
            },
            "node_modules/@babel/core": { "version": "7.23.2" },
            "node_modules/jest": { "version": "29.7.0", "dev": true },
            "node_modules/body-parser": { "version": "1.20.1" },
            "node_modules/express/node_modules/debug": { "version": "2.6.9" },
            "node_modules/broken": { "version": 42 }
        }
    }"#;

    fn find<'a>(components: &'a [Component], name: &str) -> Option<&'a Component> {
        components.iter().find(|c| c.name() == name)
    }

    #[tokio::test]
    async fn test_lock_versions_win_over_manifest_ranges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        fs::write(dir.path().join("package-lock.json"), PACKAGE_LOCK).unwrap();

        let components = NodeScanner.scan(dir.path(), false).await.unwrap();

        let express = find(&components, "express").unwrap();
        assert_eq!(express.version(), "4.18.2");
        assert_eq!(express.scope(), Scope::Direct);
        assert_eq!(express.license(), Some("MIT"));
        assert_eq!(express.hashes().len(), 1);

        assert_eq!(find(&components, "@babel/core").unwrap().version(), "7.23.2");
        assert_eq!(find(&components, "body-parser").unwrap().scope(), Scope::Transitive);
        assert_eq!(find(&components, "debug").unwrap().version(), "2.6.9");
        assert!(find(&components, "jest").is_none());
        // The malformed entry is skipped, the rest survives.
        assert!(find(&components, "broken").is_none());
        assert_eq!(components.len(), 4);
    }

    #[tokio::test]
    async fn test_dev_dependencies_included_on_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        fs::write(dir.path().join("package-lock.json"), PACKAGE_LOCK).unwrap();

        let components = NodeScanner.scan(dir.path(), true).await.unwrap();
        let jest = find(&components, "jest").unwrap();
        assert_eq!(jest.scope(), Scope::Dev);
    }

    #[tokio::test]
    async fn test_manifest_only_keeps_ranges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();

        let components = NodeScanner.scan(dir.path(), false).await.unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(find(&components, "express").unwrap().version(), "^4.18.0");
        assert!(!find(&components, "express").unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_malformed_manifest_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{
                "dependencies": { "express": "^4.18.0", "broken": { "oops": 1 } },
                "devDependencies": { "jest": "^29.0.0", "odd": 7 }
            }"#,
        )
        .unwrap();

        let components = NodeScanner.scan(dir.path(), true).await.unwrap();
        assert_eq!(find(&components, "express").unwrap().version(), "^4.18.0");
        assert_eq!(find(&components, "jest").unwrap().scope(), Scope::Dev);
        assert!(find(&components, "broken").is_none());
        assert!(find(&components, "odd").is_none());
        assert_eq!(components.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_lock_falls_back_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        fs::write(dir.path().join("package-lock.json"), "{ not json").unwrap();

        let components = NodeScanner.scan(dir.path(), false).await.unwrap();
        assert_eq!(find(&components, "express").unwrap().version(), "^4.18.0");
    }

    #[tokio::test]
    async fn test_lockfile_v1() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        fs::write(
            dir.path().join("package-lock.json"),
            r#"{
                "lockfileVersion": 1,
                "dependencies": {
                    "express": {
                        "version": "4.17.1",
                        "dependencies": { "qs": { "version": "6.7.0" } }
                    }
                }
            }"#,
        )
        .unwrap();

        let components = NodeScanner.scan(dir.path(), false).await.unwrap();
        assert_eq!(find(&components, "express").unwrap().version(), "4.17.1");
        assert_eq!(find(&components, "qs").unwrap().scope(), Scope::Transitive);
    }

    #[test]
    fn test_package_name_from_key() {
        assert_eq!(package_name_from_key("node_modules/lodash"), "lodash");
        assert_eq!(
            package_name_from_key("node_modules/a/node_modules/@scope/b"),
            "@scope/b"
        );
    }
}
