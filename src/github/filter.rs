use crate::config::GitHubConfig;
use crate::model::{RepositoryDescriptor, Visibility};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Selects which organization repositories get scanned.
///
/// Criteria are conjunctive and checked in a fixed order; the first one
/// that rejects a repository provides the reason reported for it.
///
/// # Example
///
/// ```
/// use depscan::github::RepositoryFilter;
/// use depscan::model::RepositoryDescriptor;
///
/// let filter = RepositoryFilter {
///     languages: vec!["rust".to_string()],
///     ..Default::default()
/// };
///
/// let repo = RepositoryDescriptor::new("engine").with_language("Rust");
/// assert!(filter.evaluate(&repo).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryFilter {
    pub include_private: bool,
    pub include_forks: bool,
    pub include_archived: bool,
    /// Primary languages to keep, compared case-insensitively. Empty keeps all.
    pub languages: Vec<String>,
    /// Keep repositories carrying any of these topics. Empty keeps all.
    pub topics: Vec<String>,
    /// Explicit repository names to keep.
    pub names: Option<BTreeSet<String>>,
    /// Name globs (`*` wildcard); when non-empty a name must match one.
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub min_size_kb: Option<u64>,
    pub max_size_kb: Option<u64>,
}

impl RepositoryFilter {
    /// Visibility, fork and archive inclusion taken from configuration.
    pub fn from_config(config: &GitHubConfig) -> Self {
        Self {
            include_private: config.include_private,
            include_forks: config.include_forks,
            include_archived: config.include_archived,
            ..Default::default()
        }
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Loads the name allow-list from a file, one repository per line.
    pub fn with_names_from_file(self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read repository list {}", path.display()))?;
        Ok(self.with_names(parse_name_list(&content)))
    }

    /// Returns `Err(reason)` for the first criterion that excludes `repo`.
    pub fn evaluate(&self, repo: &RepositoryDescriptor) -> Result<(), String> {
        if repo.visibility() == Visibility::Private && !self.include_private {
            return Err("private repository".to_string());
        }
        if repo.fork && !self.include_forks {
            return Err("fork".to_string());
        }
        if repo.archived && !self.include_archived {
            return Err("archived".to_string());
        }

        if !self.languages.is_empty() {
            let language = repo.language.as_deref().unwrap_or("");
            if !self
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(language))
            {
                return Err(format!(
                    "language {} not selected",
                    repo.language.as_deref().unwrap_or("unknown")
                ));
            }
        }

        if !self.topics.is_empty() && !repo.topics.iter().any(|t| self.topics.contains(t)) {
            return Err("no matching topic".to_string());
        }

        if let Some(names) = &self.names {
            if !names.contains(&repo.name) {
                return Err("not in repository list".to_string());
            }
        }

        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, &repo.name))
        {
            return Err("does not match include patterns".to_string());
        }
        if let Some(pattern) = self
            .exclude_patterns
            .iter()
            .find(|p| glob_match(p, &repo.name))
        {
            return Err(format!("matches exclude pattern {}", pattern));
        }

        if let Some(min) = self.min_size_kb {
            if repo.size < min {
                return Err(format!("smaller than {} KB", min));
            }
        }
        if let Some(max) = self.max_size_kb {
            if repo.size > max {
                return Err(format!("larger than {} KB", max));
            }
        }

        Ok(())
    }

    /// Splits `repos` into kept repositories and excluded ones with reasons,
    /// preserving the input order.
    pub fn partition(
        &self,
        repos: Vec<RepositoryDescriptor>,
    ) -> (Vec<RepositoryDescriptor>, Vec<(RepositoryDescriptor, String)>) {
        let mut kept = Vec::new();
        let mut excluded = Vec::new();
        for repo in repos {
            match self.evaluate(&repo) {
                Ok(()) => kept.push(repo),
                Err(reason) => excluded.push((repo, reason)),
            }
        }
        (kept, excluded)
    }
}

/// Parses a repository list: one name per line, blank lines and `#`
/// comments ignored.
pub fn parse_name_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Simple glob matching supporting `*` wildcards.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last) {
        return false;
    }

    let mut remaining = &text[first.len()..text.len() - last.len()];
    for part in parts[1..parts.len() - 1].iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_and_fork_conjunction() {
        let a = RepositoryDescriptor::new("A").with_language("Python");
        let b = RepositoryDescriptor::new("B").with_language("Go");
        let c = RepositoryDescriptor::new("C").with_language("Python").with_fork(true);

        let filter = RepositoryFilter {
            languages: vec!["python".to_string()],
            include_forks: false,
            ..Default::default()
        };

        let (kept, excluded) = filter.partition(vec![a, b, c]);
        let kept: Vec<_> = kept.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(kept, vec!["A"]);
        assert_eq!(excluded[0].0.name, "B");
        assert_eq!(excluded[0].1, "language Go not selected");
        assert_eq!(excluded[1].1, "fork");
    }

    #[test]
    fn test_private_excluded_unless_requested() {
        let repo = RepositoryDescriptor::new("secret").with_visibility(Visibility::Private);
        assert_eq!(
            RepositoryFilter::default().evaluate(&repo),
            Err("private repository".to_string())
        );

        let filter = RepositoryFilter {
            include_private: true,
            ..Default::default()
        };
        assert!(filter.evaluate(&repo).is_ok());
    }

    #[test]
    fn test_default_excludes_private_forks_archived() {
        let filter = RepositoryFilter::default();
        assert!(filter.evaluate(&RepositoryDescriptor::new("plain")).is_ok());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("old").with_archived(true))
            .is_err());

        let permissive = RepositoryFilter {
            include_private: true,
            include_forks: true,
            include_archived: true,
            ..Default::default()
        };
        let repo = RepositoryDescriptor::new("x")
            .with_visibility(Visibility::Private)
            .with_fork(true)
            .with_archived(true);
        assert!(permissive.evaluate(&repo).is_ok());
    }

    #[test]
    fn test_topics_match_any() {
        let filter = RepositoryFilter {
            topics: vec!["backend".to_string(), "api".to_string()],
            ..Default::default()
        };
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("svc").with_topics(&["api", "go"]))
            .is_ok());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("ui").with_topics(&["frontend"]))
            .is_err());
    }

    #[test]
    fn test_patterns_and_size() {
        let filter = RepositoryFilter {
            include_patterns: vec!["service-*".to_string()],
            exclude_patterns: vec!["*-legacy".to_string()],
            min_size_kb: Some(10),
            max_size_kb: Some(1000),
            ..Default::default()
        };

        assert!(filter
            .evaluate(&RepositoryDescriptor::new("service-auth").with_size(100))
            .is_ok());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("service-auth-legacy").with_size(100))
            .is_err());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("website").with_size(100))
            .is_err());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("service-tiny").with_size(1))
            .is_err());
        assert!(filter
            .evaluate(&RepositoryDescriptor::new("service-huge").with_size(5000))
            .is_err());
    }

    #[test]
    fn test_name_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.txt");
        fs::write(&path, "# core services\napi\n\n  worker  \n# web\n").unwrap();

        let filter = RepositoryFilter::default().with_names_from_file(&path).unwrap();
        let names = filter.names.as_ref().unwrap();
        assert_eq!(names.len(), 2);
        assert!(filter.evaluate(&RepositoryDescriptor::new("worker")).is_ok());
        assert!(filter.evaluate(&RepositoryDescriptor::new("web")).is_err());
    }

    #[test]
    fn test_missing_name_list_file() {
        assert!(RepositoryFilter::default()
            .with_names_from_file(Path::new("/nonexistent/repos.txt"))
            .is_err());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("lib-*", "lib-core"));
        assert!(glob_match("*-api", "orders-api"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*a", "a"));
        assert!(!glob_match("lib-*", "core-lib"));
        assert!(glob_match("exact", "exact"));
    }
}
