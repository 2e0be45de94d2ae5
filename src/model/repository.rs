use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Hosting metadata for one organization repository, as returned by the
/// listing endpoint. Used to filter before anything is cloned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    /// Size in kilobytes as reported by the host.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RepositoryDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            language: None,
            topics: Vec::new(),
            private: false,
            fork: false,
            archived: false,
            size: 0,
            description: None,
            default_branch: None,
            clone_url: None,
            ssh_url: None,
            html_url: None,
            updated_at: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.private = visibility == Visibility::Private;
        self
    }

    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn with_size(mut self, size_kb: u64) -> Self {
        self.size = size_kb;
        self
    }

    pub fn with_clone_urls(mut self, https: impl Into<String>, ssh: impl Into<String>) -> Self {
        self.clone_url = Some(https.into());
        self.ssh_url = Some(ssh.into());
        self
    }

    pub fn visibility(&self) -> Visibility {
        if self.private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_listing_entry() {
        let json = r#"{
            "name": "repo1",
            "full_name": "org/repo1",
            "private": false,
            "fork": false,
            "archived": false,
            "clone_url": "https://github.com/org/repo1.git",
            "ssh_url": "git@github.com:org/repo1.git",
            "html_url": "https://github.com/org/repo1",
            "description": "Test repository 1",
            "language": "Python",
            "size": 1024,
            "updated_at": "2024-01-01T00:00:00Z",
            "topics": ["test", "python"],
            "default_branch": "main",
            "stargazers_count": 3
        }"#;

        let repo: RepositoryDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(repo.name, "repo1");
        assert_eq!(repo.language.as_deref(), Some("Python"));
        assert_eq!(repo.topics, vec!["test", "python"]);
        assert_eq!(repo.size, 1024);
        assert_eq!(repo.visibility(), Visibility::Public);
        assert!(repo.updated_at.is_some());
    }

    #[test]
    fn test_deserialize_null_language() {
        let json = r#"{"name": "docs", "language": null, "private": true}"#;
        let repo: RepositoryDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(repo.language, None);
        assert_eq!(repo.visibility(), Visibility::Private);
        assert!(repo.topics.is_empty());
    }
}
