use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{log_parse_failure, read_dependency_file};

pub struct PythonScanner;

/// Names declared by the project itself, used to classify lock entries.
#[derive(Default)]
struct Declared {
    direct: Vec<(String, String)>,
    optional: Vec<(String, String)>,
    dev: Vec<(String, String)>,
}

impl Declared {
    fn scope_of(&self, name: &str) -> Option<Scope> {
        let has = |list: &[(String, String)]| list.iter().any(|(n, _)| n == name);
        if has(&self.direct) {
            Some(Scope::Direct)
        } else if has(&self.optional) {
            Some(Scope::Optional)
        } else if has(&self.dev) {
            Some(Scope::Dev)
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct PoetryLock {
    #[serde(default)]
    package: Vec<toml::Value>,
}

#[derive(Deserialize)]
struct PoetryPackage {
    name: String,
    version: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    files: Vec<PoetryFile>,
}

#[derive(Deserialize)]
struct PoetryFile {
    hash: String,
}

#[derive(Deserialize)]
struct PipfileLock {
    #[serde(default)]
    default: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    develop: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct PipfileLockEntry {
    version: Option<String>,
    #[serde(default)]
    hashes: Vec<String>,
}

#[async_trait]
impl super::Scanner for PythonScanner {
    fn id(&self) -> &'static str {
        "python"
    }

    fn name(&self) -> &'static str {
        "Python (pip/poetry/pipenv)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pypi
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &[
            "requirements.txt",
            "pyproject.toml",
            "Pipfile",
            "Pipfile.lock",
            "poetry.lock",
        ]
    }

    fn matched_files(&self, path: &Path) -> Vec<String> {
        let mut files: Vec<String> = self
            .marker_files()
            .iter()
            .filter(|f| path.join(f).is_file())
            .map(|f| f.to_string())
            .collect();
        for req in requirement_files(path) {
            if let Some(name) = req.file_name().and_then(|n| n.to_str()) {
                if !files.iter().any(|f| f == name) {
                    files.push(name.to_string());
                }
            }
        }
        files
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let declared = declared_dependencies(path);

        let poetry_lock = path.join("poetry.lock");
        if poetry_lock.is_file() {
            if let Some(components) = scan_poetry_lock(&poetry_lock, &declared, include_dev) {
                return Ok(components);
            }
        }

        let pipfile_lock = path.join("Pipfile.lock");
        if pipfile_lock.is_file() {
            if let Some(components) = scan_pipfile_lock(&pipfile_lock, &declared, include_dev) {
                return Ok(components);
            }
        }

        let mut components = Vec::new();
        let mut push = |deps: &[(String, String)], scope: Scope| {
            for (name, version) in deps {
                components.push(
                    Component::from_ecosystem(Ecosystem::Pypi, None, name, version)
                        .with_scope(scope),
                );
            }
        };
        push(&declared.direct, Scope::Direct);
        push(&declared.optional, Scope::Optional);
        if include_dev {
            push(&declared.dev, Scope::Dev);
        }
        Ok(components)
    }
}

fn scan_poetry_lock(path: &Path, declared: &Declared, include_dev: bool) -> Option<Vec<Component>> {
    let content = read_dependency_file(path)?;
    let lock: PoetryLock = match toml::from_str(&content) {
        Ok(l) => l,
        Err(e) => {
            log_parse_failure(path, e);
            return None;
        }
    };

    let mut components = Vec::new();
    for value in lock.package {
        let pkg: PoetryPackage = match value.try_into() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "skipping malformed poetry package");
                continue;
            }
        };
        let name = normalize_name(&pkg.name);
        let scope = declared.scope_of(&name).unwrap_or(
            if pkg.category.as_deref() == Some("dev") {
                Scope::Dev
            } else if pkg.optional {
                Scope::Optional
            } else {
                Scope::Transitive
            },
        );
        if scope == Scope::Dev && !include_dev {
            continue;
        }

        let mut component = Component::from_ecosystem(Ecosystem::Pypi, None, &name, &pkg.version)
            .with_scope(scope);
        if let Some(desc) = pkg.description {
            component = component.with_description(desc);
        }
        for file in pkg.files {
            if let Some((algo, value)) = split_hash(&file.hash) {
                component = component.with_hash(algo, value);
            }
        }
        components.push(component);
    }
    Some(components)
}

fn scan_pipfile_lock(path: &Path, declared: &Declared, include_dev: bool) -> Option<Vec<Component>> {
    let content = read_dependency_file(path)?;
    let lock: PipfileLock = match serde_json::from_str(&content) {
        Ok(l) => l,
        Err(e) => {
            log_parse_failure(path, e);
            return None;
        }
    };

    let mut components = Vec::new();
    let mut sections = vec![(&lock.default, false)];
    if include_dev {
        sections.push((&lock.develop, true));
    }

    for (entries, dev) in sections {
        for (raw_name, value) in entries {
            let entry: PipfileLockEntry = match serde_json::from_value(value.clone()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(entry = %raw_name, error = %e, "skipping malformed Pipfile.lock entry");
                    continue;
                }
            };
            // VCS and path entries carry no pinned version.
            let Some(version) = entry.version.as_deref() else {
                continue;
            };
            let name = normalize_name(raw_name);
            let scope = if dev {
                Scope::Dev
            } else {
                match declared.scope_of(&name) {
                    Some(Scope::Dev) | None => Scope::Transitive,
                    Some(scope) => scope,
                }
            };

            let version = version.trim_start_matches("==");
            let mut component =
                Component::from_ecosystem(Ecosystem::Pypi, None, &name, version).with_scope(scope);
            for hash in &entry.hashes {
                if let Some((algo, value)) = split_hash(hash) {
                    component = component.with_hash(algo, value);
                }
            }
            components.push(component);
        }
    }
    Some(components)
}

fn declared_dependencies(path: &Path) -> Declared {
    let mut declared = Declared::default();

    for req in requirement_files(path) {
        let dev = req
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains("dev") || n.contains("test"))
            .unwrap_or(false);
        if let Some(content) = read_dependency_file(&req) {
            let target = if dev {
                &mut declared.dev
            } else {
                &mut declared.direct
            };
            target.extend(content.lines().filter_map(parse_requirement_line));
        }
    }

    let pyproject = path.join("pyproject.toml");
    if pyproject.is_file() {
        if let Some(content) = read_dependency_file(&pyproject) {
            match content.parse::<toml::Table>() {
                Ok(table) => read_pyproject(&table, &mut declared),
                Err(e) => log_parse_failure(&pyproject, e),
            }
        }
    }

    let pipfile = path.join("Pipfile");
    if pipfile.is_file() {
        if let Some(content) = read_dependency_file(&pipfile) {
            match content.parse::<toml::Table>() {
                Ok(table) => {
                    if let Some(t) = table.get("packages").and_then(|v| v.as_table()) {
                        declared.direct.extend(table_dependencies(t));
                    }
                    if let Some(t) = table.get("dev-packages").and_then(|v| v.as_table()) {
                        declared.dev.extend(table_dependencies(t));
                    }
                }
                Err(e) => log_parse_failure(&pipfile, e),
            }
        }
    }

    declared
}

fn read_pyproject(table: &toml::Table, declared: &mut Declared) {
    if let Some(project) = table.get("project").and_then(|v| v.as_table()) {
        if let Some(deps) = project.get("dependencies").and_then(|v| v.as_array()) {
            declared
                .direct
                .extend(deps.iter().filter_map(|d| d.as_str()).filter_map(parse_requirement_line));
        }
        if let Some(extras) = project.get("optional-dependencies").and_then(|v| v.as_table()) {
            for deps in extras.values().filter_map(|v| v.as_array()) {
                declared
                    .optional
                    .extend(deps.iter().filter_map(|d| d.as_str()).filter_map(parse_requirement_line));
            }
        }
    }

    let Some(poetry) = table
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|v| v.as_table())
    else {
        return;
    };

    if let Some(t) = poetry.get("dependencies").and_then(|v| v.as_table()) {
        declared.direct.extend(table_dependencies(t));
    }
    if let Some(t) = poetry.get("dev-dependencies").and_then(|v| v.as_table()) {
        declared.dev.extend(table_dependencies(t));
    }
    if let Some(groups) = poetry.get("group").and_then(|v| v.as_table()) {
        for (name, group) in groups {
            let Some(t) = group.get("dependencies").and_then(|v| v.as_table()) else {
                continue;
            };
            let target = match name.as_str() {
                "main" => &mut declared.direct,
                "dev" | "test" => &mut declared.dev,
                _ => &mut declared.optional,
            };
            target.extend(table_dependencies(t));
        }
    }
}

/// `name = "^1.0"` or `name = { version = "^1.0", ... }` entries.
fn table_dependencies(table: &toml::Table) -> Vec<(String, String)> {
    table
        .iter()
        .filter(|(name, _)| name.as_str() != "python")
        .map(|(name, spec)| {
            let version = match spec {
                toml::Value::String(s) => s.clone(),
                toml::Value::Table(t) => t
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("*")
                    .to_string(),
                _ => "*".to_string(),
            };
            (normalize_name(name), version)
        })
        .collect()
}

/// Parses one PEP 508 style requirement into `(normalized name, version)`.
///
/// Pinned requirements (`==`) yield the bare version, anything else keeps
/// the specifier as written. Options, URLs and comments yield `None`.
fn parse_requirement_line(line: &str) -> Option<(String, String)> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('-') || line.contains("://") {
        return None;
    }
    let line = line.split(';').next().unwrap_or("").trim();

    if !line.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        .unwrap_or(line.len());
    let name = normalize_name(&line[..name_end]);

    let mut rest = line[name_end..].trim_start();
    if rest.starts_with('[') {
        rest = rest.split_once(']').map(|(_, r)| r).unwrap_or("");
    }
    let spec = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
    if !spec.is_empty() && !spec.starts_with(['=', '<', '>', '~', '!']) {
        return None;
    }

    let version = match spec.strip_prefix("==") {
        Some(pinned) if !pinned.contains(',') => pinned.trim().to_string(),
        _ if spec.is_empty() => "*".to_string(),
        _ => spec.replace(' ', ""),
    };
    Some((name, version))
}

/// PEP 503 normalization: lowercase with runs of `-`, `_`, `.` collapsed to `-`.
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.extend(c.to_lowercase());
            last_sep = false;
        }
    }
    out
}

/// `sha256:abcd` -> `("SHA-256", "abcd")`
fn split_hash(hash: &str) -> Option<(&'static str, String)> {
    let (algo, value) = hash.split_once(':')?;
    let algorithm = match algo {
        "sha256" => "SHA-256",
        "sha384" => "SHA-384",
        "sha512" => "SHA-512",
        "md5" => "MD5",
        _ => return None,
    };
    Some((algorithm, value.to_string()))
}

fn requirement_files(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("requirements") && n.ends_with(".txt"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
