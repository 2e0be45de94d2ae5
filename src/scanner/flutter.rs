use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::{log_parse_failure, read_dependency_file};

pub struct FlutterScanner;

#[derive(Deserialize)]
struct PubspecLock {
    #[serde(default)]
    packages: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct LockedPackage {
    dependency: String,
    source: String,
    version: String,
    #[serde(default)]
    description: Value,
}

#[derive(Deserialize, Default)]
struct Pubspec {
    #[serde(default)]
    dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, Value>,
}

#[async_trait]
impl super::Scanner for FlutterScanner {
    fn id(&self) -> &'static str {
        "flutter"
    }

    fn name(&self) -> &'static str {
        "Flutter/Dart (pub)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pub
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["pubspec.yaml", "pubspec.lock"]
    }

    fn detect(&self, path: &Path) -> bool {
        path.join("pubspec.yaml").is_file()
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let lock_path = path.join("pubspec.lock");
        if lock_path.is_file() {
            if let Some(content) = read_dependency_file(&lock_path) {
                match serde_yaml::from_str::<PubspecLock>(&content) {
                    Ok(lock) => return Ok(components_from_lock(lock, include_dev)),
                    Err(e) => log_parse_failure(&lock_path, e),
                }
            }
        }

        let manifest_path = path.join("pubspec.yaml");
        let Some(content) = read_dependency_file(&manifest_path) else {
            return Ok(Vec::new());
        };
        let pubspec: Pubspec = match serde_yaml::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                log_parse_failure(&manifest_path, e);
                return Ok(Vec::new());
            }
        };

        let mut components = manifest_components(&pubspec.dependencies, Scope::Direct);
        if include_dev {
            components.extend(manifest_components(&pubspec.dev_dependencies, Scope::Dev));
        }
        Ok(components)
    }
}

fn components_from_lock(lock: PubspecLock, include_dev: bool) -> Vec<Component> {
    let mut components = Vec::new();

    for (name, value) in lock.packages {
        let pkg: LockedPackage = match serde_yaml::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(package = %name, error = %e, "skipping malformed pubspec.lock entry");
                continue;
            }
        };
        // Flutter SDK packages and local paths are not third-party dependencies.
        if pkg.source == "sdk" || pkg.source == "path" {
            continue;
        }

        let scope = match pkg.dependency.as_str() {
            "direct dev" => Scope::Dev,
            "transitive" => Scope::Transitive,
            _ => Scope::Direct,
        };
        if scope == Scope::Dev && !include_dev {
            continue;
        }

        let mut component =
            Component::from_ecosystem(Ecosystem::Pub, None, &name, &pkg.version).with_scope(scope);
        if let Some(sha) = pkg.description.get("sha256").and_then(Value::as_str) {
            component = component.with_hash("SHA-256", sha);
        }
        if let Some(url) = pkg.description.get("url").and_then(Value::as_str) {
            if pkg.source == "git" {
                component = component.with_repository_url(url);
            }
        }
        components.push(component);
    }

    components
}

fn manifest_components(deps: &BTreeMap<String, Value>, scope: Scope) -> Vec<Component> {
    deps.iter()
        .filter_map(|(name, spec)| {
            let version = match spec {
                Value::String(s) => s.clone(),
                Value::Null => "any".to_string(),
                Value::Mapping(m) => {
                    if m.contains_key("sdk") || m.contains_key("path") {
                        return None;
                    }
                    m.get("version")
                        .and_then(Value::as_str)
                        .unwrap_or("any")
                        .to_string()
                }
                _ => return None,
            };
            Some(Component::from_ecosystem(Ecosystem::Pub, None, name, version).with_scope(scope))
        })
        .collect()
}
