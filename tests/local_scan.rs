use depscan::detector::TechnologyDetector;
use depscan::model::{Ecosystem, Scope};
use depscan::Aggregator;
use std::fs;
use std::path::Path;

fn polyglot_repo(root: &Path) {
    fs::write(
        root.join("package.json"),
        r#"{"name":"web","dependencies":{"express":"^4.18.0"},"devDependencies":{"jest":"^29.0.0"}}"#,
    )
    .unwrap();
    fs::write(
        root.join("package-lock.json"),
        r#"{
            "lockfileVersion": 3,
            "packages": {
                "": { "name": "web" },
                "node_modules/express": { "version": "4.18.2", "license": "MIT" },
                "node_modules/accepts": { "version": "1.3.8" },
                "node_modules/jest": { "version": "29.7.0", "dev": true }
            }
        }"#,
    )
    .unwrap();

    fs::write(
        root.join("Cargo.toml"),
        "[package]\nname = \"core\"\nversion = \"0.1.0\"\n\n[dependencies]\nserde = \"1\"\n",
    )
    .unwrap();
    fs::write(
        root.join("Cargo.lock"),
        r#"
version = 3

[[package]]
name = "core"
version = "0.1.0"

[[package]]
name = "serde"
version = "1.0.190"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#,
    )
    .unwrap();

    fs::write(root.join("requirements.txt"), "requests==2.31.0\n").unwrap();
}

#[tokio::test]
async fn test_polyglot_repository() {
    let dir = tempfile::tempdir().unwrap();
    polyglot_repo(dir.path());

    let result = Aggregator::new().scan(dir.path(), false).await.unwrap();

    for tech in ["Node.js", "Rust", "Python"] {
        assert!(
            result.technologies.iter().any(|t| t == tech),
            "missing {} in {:?}",
            tech,
            result.technologies
        );
    }

    let find = |name: &str| result.components.iter().find(|c| c.name() == name);

    let express = find("express").unwrap();
    assert_eq!(express.version(), "4.18.2");
    assert_eq!(express.ecosystem(), Some(Ecosystem::Npm));
    assert_eq!(express.scope(), Scope::Direct);
    assert_eq!(find("accepts").unwrap().scope(), Scope::Transitive);
    assert!(find("jest").is_none());

    assert_eq!(find("serde").unwrap().version(), "1.0.190");
    assert_eq!(find("requests").unwrap().version(), "2.31.0");

    assert_eq!(result.components.len(), 4);
    assert_eq!(result.stats.total_components, 4);
    assert_eq!(result.stats.direct, 3);
}

#[tokio::test]
async fn test_rescan_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    polyglot_repo(dir.path());

    let aggregator = Aggregator::new();
    let first = aggregator.scan(dir.path(), true).await.unwrap();
    let second = aggregator.scan(dir.path(), true).await.unwrap();

    let mut a: Vec<String> = first.components.iter().map(|c| c.to_string()).collect();
    let mut b: Vec<String> = second.components.iter().map(|c| c.to_string()).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert!(first.components.iter().any(|c| c.name() == "jest" && c.scope() == Scope::Dev));
}

#[test]
fn test_detect_stack_reports_marker_files() {
    let dir = tempfile::tempdir().unwrap();
    polyglot_repo(dir.path());

    let stack = TechnologyDetector::new().detect_stack(dir.path());
    let node = stack.iter().find(|t| t.name == "Node.js").unwrap();
    assert_eq!(node.scanner, "node");
    assert!(node.files.contains(&"package-lock.json".to_string()));
    assert!(stack.iter().any(|t| t.name == "Rust"));
    assert!(stack.iter().any(|t| t.name == "Python"));
    assert!(!stack.iter().any(|t| t.name == "Go"));
}
