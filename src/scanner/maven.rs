use crate::model::{Component, Ecosystem, Scope};
use crate::platform::{run_tool, tool_available};
use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

use super::{is_ignored_dir, log_parse_failure, read_dependency_file};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Scans Maven projects.
///
/// Uses `mvn dependency:tree` for the fully resolved graph when Maven is
/// installed, falling back to reading every `pom.xml` in the tree.
pub struct MavenScanner {
    tool_timeout: Duration,
    use_cli: bool,
}

impl MavenScanner {
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Never invokes `mvn`, only parses POM files.
    pub fn file_only() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            use_cli: false,
        }
    }

    async fn scan_with_cli(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let output = run_tool(
            "mvn",
            ["dependency:tree", "-B", "-DoutputType=text"],
            path,
            self.tool_timeout,
        )
        .await?;
        if !output.status.success() {
            bail!("mvn dependency:tree exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let components: Vec<Component> = parse_dependency_tree(&stdout)?
            .into_iter()
            .filter(|c| include_dev || c.scope() != Scope::Dev)
            .collect();
        if components.is_empty() {
            bail!("mvn dependency:tree produced no dependencies");
        }
        Ok(components)
    }
}

impl Default for MavenScanner {
    fn default() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            use_cli: true,
        }
    }
}

#[async_trait]
impl super::Scanner for MavenScanner {
    fn id(&self) -> &'static str {
        "maven"
    }

    fn name(&self) -> &'static str {
        "Maven"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Maven
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["pom.xml"]
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        if self.use_cli && tool_available("mvn") {
            match self.scan_with_cli(path, include_dev).await {
                Ok(components) => return Ok(components),
                Err(e) => {
                    tracing::warn!(scanner = "maven", error = %e, "falling back to pom.xml parsing")
                }
            }
        }

        scan_pom_files(path, include_dev)
    }
}

fn classify(scope: &str, optional: bool, direct: bool) -> Scope {
    match scope {
        "test" | "provided" => Scope::Dev,
        _ if optional => Scope::Optional,
        _ if direct => Scope::Direct,
        _ => Scope::Transitive,
    }
}

/// Parses `mvn dependency:tree` console output.
///
/// Dependency lines look like `[INFO] +- group:artifact:type[:classifier]:version:scope`;
/// entries right under a module root are direct, deeper ones transitive.
/// Module roots (`[INFO] group:artifact:type:version`) are collected so that
/// references between modules of the same build are dropped.
fn parse_dependency_tree(output: &str) -> Result<Vec<Component>> {
    let line_re = Regex::new(r"^\[INFO\] ((?:[| ] {2})*)[+\\]- (\S+)(.*)$")?;
    let module_re = Regex::new(r"^\[INFO\] ([^\s:]+):([^\s:]+):[^\s:]+:[^\s:]+$")?;

    let mut modules: HashSet<(String, String)> = HashSet::new();
    let mut entries = Vec::new();
    for line in output.lines() {
        if let Some(caps) = module_re.captures(line) {
            modules.insert((caps[1].to_string(), caps[2].to_string()));
            continue;
        }
        let Some(caps) = line_re.captures(line) else {
            continue;
        };
        let depth = caps.get(1).map(|m| m.as_str().len() / 3).unwrap_or(0);
        let coords: Vec<&str> = caps.get(2).map_or("", |m| m.as_str()).split(':').collect();
        let (group, artifact, version, scope) = match coords.as_slice() {
            [g, a, _packaging, v, s] => (*g, *a, *v, *s),
            [g, a, _packaging, _classifier, v, s] => (*g, *a, *v, *s),
            _ => {
                tracing::debug!(line, "skipping unrecognized dependency tree line");
                continue;
            }
        };
        let optional = caps[3].contains("(optional)");
        entries.push((group, artifact, version, classify(scope, optional, depth == 0)));
    }

    let components = entries
        .into_iter()
        .filter(|(g, a, _, _)| !modules.contains(&(g.to_string(), a.to_string())))
        .map(|(group, artifact, version, scope)| {
            Component::from_ecosystem(Ecosystem::Maven, Some(group), artifact, version)
                .with_scope(scope)
        })
        .collect();
    Ok(components)
}

struct PomDependency {
    group: String,
    artifact: String,
    version: String,
    scope: Scope,
}

struct Pom {
    coordinates: Option<(String, String)>,
    dependencies: Vec<PomDependency>,
}

/// Regexes used to pick a POM apart, compiled once per scan.
struct PomPatterns {
    comment: Regex,
    managed: Regex,
    build: Regex,
    profiles: Regex,
    parent: Regex,
    dependencies: Regex,
    properties: Regex,
    property: Regex,
    dependency: Regex,
    placeholder: Regex,
}

impl PomPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            comment: Regex::new(r"(?s)<!--.*?-->")?,
            managed: Regex::new(r"(?s)<dependencyManagement>.*?</dependencyManagement>")?,
            build: Regex::new(r"(?s)<build>.*?</build>")?,
            profiles: Regex::new(r"(?s)<profiles>.*?</profiles>")?,
            parent: Regex::new(r"(?s)<parent>.*?</parent>")?,
            dependencies: Regex::new(r"(?s)<dependencies>.*?</dependencies>")?,
            properties: Regex::new(r"(?s)<properties>(.*?)</properties>")?,
            property: Regex::new(r"<([A-Za-z0-9_.\-]+)>\s*([^<]*?)\s*</([A-Za-z0-9_.\-]+)>")?,
            dependency: Regex::new(r"(?s)<dependency>(.*?)</dependency>")?,
            placeholder: Regex::new(r"\$\{([^}]+)\}")?,
        })
    }
}

fn scan_pom_files(root: &Path, include_dev: bool) -> Result<Vec<Component>> {
    let patterns = PomPatterns::new()?;
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !e.file_name().to_str().map(is_ignored_dir).unwrap_or(false)
    });

    let mut poms = Vec::new();
    for entry in walker.flatten() {
        if entry.file_name() != "pom.xml" || !entry.file_type().is_file() {
            continue;
        }
        let Some(content) = read_dependency_file(entry.path()) else {
            continue;
        };
        match parse_pom(&content, &patterns) {
            Ok(pom) => poms.push(pom),
            Err(e) => log_parse_failure(entry.path(), e),
        }
    }

    // Inter-module references are part of the project, not third-party code.
    let modules: HashSet<(String, String)> =
        poms.iter().filter_map(|p| p.coordinates.clone()).collect();

    let components = poms
        .into_iter()
        .flat_map(|p| p.dependencies)
        .filter(|d| !modules.contains(&(d.group.clone(), d.artifact.clone())))
        .filter(|d| include_dev || d.scope != Scope::Dev)
        .map(|d| {
            Component::from_ecosystem(Ecosystem::Maven, Some(&d.group), &d.artifact, &d.version)
                .with_scope(d.scope)
        })
        .collect();
    Ok(components)
}

fn parse_pom(content: &str, patterns: &PomPatterns) -> Result<Pom> {
    if !content.contains("<project") {
        bail!("not a Maven project descriptor");
    }

    let content = patterns.comment.replace_all(content, "");
    let content = patterns.managed.replace_all(&content, "");
    let content = patterns.build.replace_all(&content, "");
    let content = patterns.profiles.replace_all(&content, "");

    let mut properties: HashMap<String, String> = HashMap::new();
    if let Some(block) = patterns.properties.captures(&content) {
        for caps in patterns.property.captures_iter(&block[1]) {
            if caps[1] == caps[3] {
                properties.insert(caps[1].to_string(), caps[2].to_string());
            }
        }
    }

    // What remains outside parent/dependencies/properties is the project header.
    let parent_group = patterns
        .parent
        .find(&content)
        .and_then(|m| tag_value(m.as_str(), "groupId"));
    let header = patterns.parent.replace_all(&content, "");
    let header = patterns.dependencies.replace_all(&header, "");
    let header = patterns.properties.replace_all(&header, "");
    let group = tag_value(&header, "groupId").or(parent_group);
    let artifact = tag_value(&header, "artifactId");
    if let Some(version) = tag_value(&header, "version") {
        properties.insert("project.version".to_string(), version);
    }
    if let Some(group) = &group {
        properties.insert("project.groupId".to_string(), group.clone());
    }

    let resolve = |value: String| -> Option<String> {
        let resolved = patterns.placeholder.replace_all(&value, |caps: &regex::Captures| {
            properties
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        if resolved.contains("${") {
            None
        } else {
            Some(resolved.into_owned())
        }
    };

    let mut dependencies = Vec::new();
    for caps in patterns.dependency.captures_iter(&content) {
        let block = &caps[1];
        let (Some(dep_group), Some(dep_artifact)) =
            (tag_value(block, "groupId"), tag_value(block, "artifactId"))
        else {
            tracing::debug!("skipping dependency without coordinates");
            continue;
        };
        let Some(version) = tag_value(block, "version").and_then(&resolve) else {
            tracing::debug!(artifact = %dep_artifact, "skipping dependency with unresolved version");
            continue;
        };
        let Some(dep_group) = resolve(dep_group) else {
            continue;
        };
        let scope = tag_value(block, "scope").unwrap_or_else(|| "compile".to_string());
        let optional = tag_value(block, "optional").as_deref() == Some("true");

        dependencies.push(PomDependency {
            group: dep_group,
            artifact: dep_artifact,
            version,
            scope: classify(&scope, optional, true),
        });
    }

    Ok(Pom {
        coordinates: group.zip(artifact),
        dependencies,
    })
}

/// Text of the first `<tag>…</tag>` element in `xml`, trimmed.
fn tag_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    let value = xml[start..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
