use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use super::read_dependency_file;

pub struct GoScanner;

struct Requirement {
    module: String,
    version: String,
    indirect: bool,
}

#[async_trait]
impl super::Scanner for GoScanner {
    fn id(&self) -> &'static str {
        "go"
    }

    fn name(&self) -> &'static str {
        "Go (modules)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Golang
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["go.mod", "go.sum"]
    }

    fn detect(&self, path: &Path) -> bool {
        path.join("go.mod").is_file()
    }

    async fn scan(&self, path: &Path, _include_dev: bool) -> Result<Vec<Component>> {
        let Some(go_mod) = read_dependency_file(&path.join("go.mod")) else {
            return Ok(Vec::new());
        };

        let sums = if path.join("go.sum").is_file() {
            read_dependency_file(&path.join("go.sum"))
                .map(|s| parse_go_sum(&s))
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        let components = parse_go_mod(&go_mod)
            .into_iter()
            .map(|req| {
                let (group, name) = split_module_path(&req.module);
                let scope = if req.indirect {
                    Scope::Transitive
                } else {
                    Scope::Direct
                };
                let mut component =
                    Component::from_ecosystem(Ecosystem::Golang, group, name, &req.version)
                        .with_scope(scope)
                        .with_repository_url(format!("https://{}", req.module));
                if let Some(hash) = sums.get(&(req.module.clone(), req.version.clone())) {
                    component = component.with_hash("SHA-256", hash.clone());
                }
                component
            })
            .collect();

        Ok(components)
    }
}

/// Extracts `require` directives, both single-line and block form.
fn parse_go_mod(content: &str) -> Vec<Requirement> {
    let mut requirements = Vec::new();
    let mut in_block = false;

    for raw in content.lines() {
        let line = raw.trim();
        if in_block {
            if line.starts_with(')') {
                in_block = false;
                continue;
            }
            if let Some(req) = parse_requirement(line) {
                requirements.push(req);
            }
        } else if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest.starts_with('(') {
                in_block = true;
            } else if let Some(req) = parse_requirement(rest) {
                requirements.push(req);
            }
        }
    }

    requirements
}

fn parse_requirement(line: &str) -> Option<Requirement> {
    let (spec, comment) = match line.split_once("//") {
        Some((spec, comment)) => (spec, Some(comment)),
        None => (line, None),
    };
    let mut parts = spec.split_whitespace();
    let module = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with('v') {
        tracing::debug!(line, "skipping unrecognized go.mod requirement");
        return None;
    }

    Some(Requirement {
        module: module.to_string(),
        version: version.to_string(),
        indirect: comment.map(|c| c.trim() == "indirect").unwrap_or(false),
    })
}

/// Maps `(module, version)` to the `h1:` hash of the module zip.
fn parse_go_sum(content: &str) -> HashMap<(String, String), String> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let module = parts.next()?;
            let version = parts.next()?;
            let hash = parts.next()?.strip_prefix("h1:")?;
            // `/go.mod` lines hash only the manifest.
            if version.ends_with("/go.mod") {
                return None;
            }
            Some(((module.to_string(), version.to_string()), hash.to_string()))
        })
        .collect()
}

/// `github.com/gin-gonic/gin` -> `(Some("github.com/gin-gonic"), "gin")`
fn split_module_path(module: &str) -> (Option<&str>, &str) {
    match module.rsplit_once('/') {
        Some((group, name)) => (Some(group), name),
        None => (None, module),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use std::fs;

    const GO_MOD: &str = r#"module example.com/api

go 1.21

require github.com/gin-gonic/gin v1.9.1

require (
	github.com/stretchr/testify v1.8.4
	golang.org/x/net v0.17.0 // indirect
	this-line-is-garbage
)
"#;

    const GO_SUM: &str = "\
github.com/gin-gonic/gin v1.9.1 h1:4idEAncQnU5cB7BeOkPtxjfCSye0AAm1R0RVIqJ+Jmg=
github.com/gin-gonic/gin v1.9.1/go.mod h1:hPrL7YrpYKXt5YId3A/Tnip5kqbEAP+KLuI3SUcPTeU=
";

    #[tokio::test]
    async fn test_scan_go_mod_with_sums() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), GO_MOD).unwrap();
        fs::write(dir.path().join("go.sum"), GO_SUM).unwrap();

        let components = GoScanner.scan(dir.path(), false).await.unwrap();
        assert_eq!(components.len(), 3);

        let gin = &components[0];
        assert_eq!(gin.name(), "gin");
        assert_eq!(gin.group(), Some("github.com/gin-gonic"));
        assert_eq!(gin.purl(), Some("pkg:golang/github.com/gin-gonic/gin@v1.9.1"));
        assert_eq!(gin.scope(), Scope::Direct);
        assert_eq!(gin.hashes().len(), 1);

        let net = components.iter().find(|c| c.name() == "net").unwrap();
        assert_eq!(net.scope(), Scope::Transitive);
        assert!(net.hashes().is_empty());
    }

    #[test]
    fn test_parse_requirement_indirect_marker() {
        let req = parse_requirement("golang.org/x/text v0.13.0 // indirect").unwrap();
        assert!(req.indirect);
        let req = parse_requirement("golang.org/x/text v0.13.0 // some note").unwrap();
        assert!(!req.indirect);
    }
}
