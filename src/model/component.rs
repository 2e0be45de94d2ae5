use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Package ecosystem a component was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Maven,
    Pypi,
    Npm,
    Golang,
    Cargo,
    Gem,
    Pub,
}

impl Ecosystem {
    /// The package-url type for this ecosystem.
    pub fn purl_type(&self) -> &'static str {
        match self {
            Ecosystem::Maven => "maven",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Npm => "npm",
            Ecosystem::Golang => "golang",
            Ecosystem::Cargo => "cargo",
            Ecosystem::Gem => "gem",
            Ecosystem::Pub => "pub",
        }
    }

    /// Human-readable technology name reported by the detector.
    pub fn technology(&self) -> &'static str {
        match self {
            Ecosystem::Maven => "Maven",
            Ecosystem::Pypi => "Python",
            Ecosystem::Npm => "Node.js",
            Ecosystem::Golang => "Go",
            Ecosystem::Cargo => "Rust",
            Ecosystem::Gem => "Ruby",
            Ecosystem::Pub => "Flutter",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.purl_type())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Library,
    Framework,
    Application,
    Tool,
}

/// How a component entered the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Direct,
    Transitive,
    Optional,
    Dev,
}

impl Scope {
    fn precedence(self) -> u8 {
        match self {
            Scope::Direct => 3,
            Scope::Transitive => 2,
            Scope::Optional => 1,
            Scope::Dev => 0,
        }
    }

    /// Returns the more specific of two scopes: direct > transitive > optional > dev.
    pub fn most_specific(self, other: Scope) -> Scope {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Direct => "direct",
            Scope::Transitive => "transitive",
            Scope::Optional => "optional",
            Scope::Dev => "dev",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash {
    pub algorithm: String,
    pub value: String,
}

impl ContentHash {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
        }
    }
}

/// Identity under which two components are considered the same dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    Purl(String),
    Triplet {
        name: String,
        version: String,
        component_type: ComponentType,
    },
}

/// A single third-party dependency discovered in a repository.
///
/// Components are built once by a scanner and never modified afterwards;
/// [`Component::merged`] produces a new value instead of mutating either side.
///
/// # Example
///
/// ```
/// use depscan::model::{Component, Ecosystem, Scope};
///
/// let c = Component::from_ecosystem(Ecosystem::Maven, Some("org.slf4j"), "slf4j-api", "2.0.9")
///     .with_scope(Scope::Transitive)
///     .with_license("MIT");
///
/// assert_eq!(c.purl(), Some("pkg:maven/org.slf4j/slf4j-api@2.0.9"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    name: String,
    version: String,
    #[serde(rename = "type")]
    component_type: ComponentType,
    scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ecosystem: Option<Ecosystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    hashes: BTreeSet<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
}

impl Component {
    /// A direct library dependency without a package url.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            component_type: ComponentType::Library,
            scope: Scope::Direct,
            ecosystem: None,
            group: None,
            purl: None,
            license: None,
            description: None,
            hashes: BTreeSet::new(),
            repository_url: None,
            author: None,
        }
    }

    /// A direct library dependency with its package url derived from the ecosystem.
    pub fn from_ecosystem(
        ecosystem: Ecosystem,
        group: Option<&str>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let mut component = Self::new(name, version);
        let group = group.filter(|g| !g.is_empty()).map(str::to_string);
        component.purl = Some(package_url(
            ecosystem,
            group.as_deref(),
            &component.name,
            &component.version,
        ));
        component.ecosystem = Some(ecosystem);
        component.group = group;
        component
    }

    pub fn with_type(mut self, component_type: ComponentType) -> Self {
        self.component_type = component_type;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_purl(mut self, purl: impl Into<String>) -> Self {
        self.purl = Some(purl.into());
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = non_empty(license.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_empty(description.into());
        self
    }

    pub fn with_hash(mut self, algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        self.hashes.insert(ContentHash::new(algorithm, value));
        self
    }

    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = non_empty(url.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = non_empty(author.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn ecosystem(&self) -> Option<Ecosystem> {
        self.ecosystem
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn purl(&self) -> Option<&str> {
        self.purl.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn hashes(&self) -> &BTreeSet<ContentHash> {
        &self.hashes
    }

    pub fn repository_url(&self) -> Option<&str> {
        self.repository_url.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// The key used to collapse duplicates: the package url when known,
    /// otherwise the `(name, version, type)` triplet.
    pub fn dedup_key(&self) -> DedupKey {
        match self.purl.as_deref().filter(|p| !p.is_empty()) {
            Some(purl) => DedupKey::Purl(purl.to_string()),
            None => DedupKey::Triplet {
                name: self.name.clone(),
                version: self.version.clone(),
                component_type: self.component_type,
            },
        }
    }

    /// True when the version is an exact release rather than a range.
    pub fn is_resolved(&self) -> bool {
        is_exact_version(&self.version)
    }

    /// Folds `other` into `self`, treating `self` as the first-seen entry.
    ///
    /// Optional fields keep the first non-empty value, scopes resolve to the
    /// more specific one and hash sets are unioned.
    pub fn merged(&self, other: &Component) -> Component {
        let mut hashes = self.hashes.clone();
        hashes.extend(other.hashes.iter().cloned());

        Component {
            name: self.name.clone(),
            version: self.version.clone(),
            component_type: self.component_type,
            scope: self.scope.most_specific(other.scope),
            ecosystem: self.ecosystem.or(other.ecosystem),
            group: first_present(&self.group, &other.group),
            purl: first_present(&self.purl, &other.purl),
            license: first_present(&self.license, &other.license),
            description: first_present(&self.description, &other.description),
            hashes,
            repository_url: first_present(&self.repository_url, &other.repository_url),
            author: first_present(&self.author, &other.author),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.scope)
    }
}

/// Builds `pkg:<type>/<namespace>/<name>@<version>`, omitting the namespace
/// segment when there is none.
pub fn package_url(ecosystem: Ecosystem, group: Option<&str>, name: &str, version: &str) -> String {
    let (namespace, name) = match group {
        Some(g) => (Some(g.to_string()), name.to_string()),
        // Scoped npm packages carry their namespace in the name.
        None => match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
            Some((scope, bare)) => (Some(format!("@{}", scope)), bare.to_string()),
            None => (None, name.to_string()),
        },
    };

    match namespace {
        Some(ns) => format!(
            "pkg:{}/{}/{}@{}",
            ecosystem.purl_type(),
            ns.replace('@', "%40"),
            name,
            version
        ),
        None => format!("pkg:{}/{}@{}", ecosystem.purl_type(), name, version),
    }
}

fn is_exact_version(version: &str) -> bool {
    let v = version.trim();
    let v = v.strip_prefix('v').unwrap_or(v);
    if v.is_empty() || v == "latest" || v == "unknown" {
        return false;
    }
    if semver::Version::parse(v).is_ok() {
        return true;
    }
    !v.chars().any(|c| {
        matches!(
            c,
            '^' | '~' | '<' | '>' | '=' | '*' | '|' | ',' | ' ' | '!' | '[' | '('
        )
    }) && !v.split('.').any(|part| part == "x" || part == "X")
}

fn first_present(first: &Option<String>, second: &Option<String>) -> Option<String> {
    first
        .as_ref()
        .filter(|s| !s.is_empty())
        .or(second.as_ref().filter(|s| !s.is_empty()))
        .cloned()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
