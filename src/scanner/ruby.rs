use crate::model::{Component, Ecosystem, Scope};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::read_dependency_file;

pub struct RubyScanner;

const DEV_GROUPS: &[&str] = &["development", "test"];

#[derive(Default)]
struct Gemfile {
    /// name -> requirement ("*" when unconstrained)
    runtime: BTreeMap<String, String>,
    dev: BTreeMap<String, String>,
}

#[async_trait]
impl super::Scanner for RubyScanner {
    fn id(&self) -> &'static str {
        "ruby"
    }

    fn name(&self) -> &'static str {
        "Ruby (bundler)"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Gem
    }

    fn marker_files(&self) -> &'static [&'static str] {
        &["Gemfile", "Gemfile.lock"]
    }

    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>> {
        let gemfile_path = path.join("Gemfile");
        let gemfile = if gemfile_path.is_file() {
            read_dependency_file(&gemfile_path)
                .map(|c| parse_gemfile(&c))
                .unwrap_or_default()
        } else {
            Gemfile::default()
        };

        let lock_path = path.join("Gemfile.lock");
        if lock_path.is_file() {
            if let Some(content) = read_dependency_file(&lock_path) {
                return Ok(components_from_lock(&content, &gemfile, include_dev));
            }
        }

        let mut components: Vec<Component> = gemfile
            .runtime
            .iter()
            .map(|(name, req)| {
                Component::from_ecosystem(Ecosystem::Gem, None, name, req).with_scope(Scope::Direct)
            })
            .collect();
        if include_dev {
            components.extend(gemfile.dev.iter().map(|(name, req)| {
                Component::from_ecosystem(Ecosystem::Gem, None, name, req).with_scope(Scope::Dev)
            }));
        }
        Ok(components)
    }
}

fn components_from_lock(content: &str, gemfile: &Gemfile, include_dev: bool) -> Vec<Component> {
    let mut specs: Vec<(String, String)> = Vec::new();
    let mut direct: HashSet<String> = HashSet::new();
    let mut section = "";
    let mut in_specs = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            section = line.trim();
            in_specs = false;
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let text = line.trim();
        match section {
            "GEM" | "GIT" | "PATH" => {
                if indent == 2 {
                    in_specs = text == "specs:";
                } else if indent == 4 && in_specs {
                    match parse_spec(text) {
                        Some(spec) => specs.push(spec),
                        None => tracing::debug!(line = text, "skipping malformed Gemfile.lock spec"),
                    }
                }
            }
            "DEPENDENCIES" if indent == 2 => {
                let name = text
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .trim_end_matches('!');
                if !name.is_empty() {
                    direct.insert(name.to_string());
                }
            }
            _ => {}
        }
    }

    specs
        .into_iter()
        .filter_map(|(name, version)| {
            let scope = if gemfile.dev.contains_key(&name) && !gemfile.runtime.contains_key(&name) {
                Scope::Dev
            } else if direct.contains(&name) {
                Scope::Direct
            } else {
                Scope::Transitive
            };
            if scope == Scope::Dev && !include_dev {
                return None;
            }
            Some(Component::from_ecosystem(Ecosystem::Gem, None, &name, &version).with_scope(scope))
        })
        .collect()
}

/// `rack (2.2.8)` -> `("rack", "2.2.8")`
fn parse_spec(text: &str) -> Option<(String, String)> {
    let (name, rest) = text.split_once(" (")?;
    let version = rest.strip_suffix(')')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

fn parse_gemfile(content: &str) -> Gemfile {
    let mut gemfile = Gemfile::default();
    let mut group_stack: Vec<bool> = Vec::new();

    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(groups) = line.strip_prefix("group ") {
            let dev = groups
                .trim_end_matches("do")
                .split(',')
                .map(|g| g.trim().trim_start_matches(':').trim_matches(|c: char| c == '"' || c == '\''))
                .all(|g| DEV_GROUPS.contains(&g));
            group_stack.push(dev);
            continue;
        }
        if line.ends_with(" do") || line == "do" {
            // Blocks like `platforms :jruby do` keep the enclosing group.
            let inherited = group_stack.last().copied().unwrap_or(false);
            group_stack.push(inherited);
            continue;
        }
        if line == "end" {
            group_stack.pop();
            continue;
        }

        let Some(args) = line.strip_prefix("gem ") else {
            continue;
        };
        let mut parts = args.split(',').map(str::trim);
        let Some(name) = parts.next().map(unquote).filter(|n| !n.is_empty()) else {
            continue;
        };

        let mut requirements = Vec::new();
        let mut dev = group_stack.last().copied().unwrap_or(false);
        for part in parts {
            if part.starts_with('"') || part.starts_with('\'') {
                requirements.push(unquote(part));
            } else if let Some(groups) = part
                .strip_prefix("group:")
                .or_else(|| part.strip_prefix(":group =>"))
            {
                let g = groups.trim().trim_start_matches(':').trim_matches(['[', ']']);
                dev = DEV_GROUPS.contains(&unquote(g).as_str());
            }
        }

        let requirement = if requirements.is_empty() {
            "*".to_string()
        } else {
            requirements.join(",")
        };
        if dev {
            gemfile.dev.insert(name, requirement);
        } else {
            gemfile.runtime.insert(name, requirement);
        }
    }

    gemfile
}

fn unquote(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .to_string()
}
