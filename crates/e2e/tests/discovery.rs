//! Case discovery against real directory trees

use std::fs;
use std::path::Path;

use autotest_e2e::discovery::{discover, DiscoveryOptions};
use autotest_e2e::error::DiscoveryError;
use tempfile::TempDir;

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "config: {}\n").unwrap();
}

fn options(root: &Path) -> DiscoveryOptions {
    DiscoveryOptions {
        source_root: root.to_path_buf(),
        ..Default::default()
    }
}

fn tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "shop/checkout.yaml");
    touch(dir.path(), "shop/cart.yml");
    touch(dir.path(), "shop/notes.txt");
    touch(dir.path(), "blog/deep/nested/post.json");
    touch(dir.path(), "blog/README.md");
    touch(dir.path(), "about.yaml");
    dir
}

#[test]
fn finds_only_case_files_in_sorted_order() {
    let dir = tree();
    let references = discover(dir.path(), &options(dir.path())).unwrap();

    let found: Vec<_> = references.iter().map(|r| r.as_str()).collect();
    assert_eq!(
        found,
        vec![
            "./about.yaml",
            "./blog/deep/nested/post.json",
            "./shop/cart.yml",
            "./shop/checkout.yaml",
        ]
    );
}

#[test]
fn discovery_is_deterministic() {
    let dir = tree();
    let first = discover(dir.path(), &options(dir.path())).unwrap();
    let second = discover(dir.path(), &options(dir.path())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn subdirectory_is_relative_to_source_root() {
    let dir = tree();
    let references = discover(&dir.path().join("shop"), &options(dir.path())).unwrap();

    let found: Vec<_> = references.iter().map(|r| r.as_str()).collect();
    assert_eq!(found, vec!["./shop/cart.yml", "./shop/checkout.yaml"]);
}

#[test]
fn single_file_yields_one_reference() {
    let dir = tree();
    let file = dir.path().join("shop/checkout.yaml");
    let references = discover(&file, &options(dir.path())).unwrap();

    assert_eq!(references.len(), 1);
    assert_eq!(references[0].as_str(), "./shop/checkout.yaml");
    assert_eq!(references[0].base_name(), "checkout");
}

#[test]
fn single_file_with_unknown_extension_is_rejected() {
    let dir = tree();
    let file = dir.path().join("shop/notes.txt");
    let err = discover(&file, &options(dir.path())).unwrap_err();
    assert!(matches!(err, DiscoveryError::UnsupportedFile(_)));
}

#[test]
fn missing_root_fails() {
    let dir = TempDir::new().unwrap();
    let err = discover(&dir.path().join("nope"), &options(dir.path())).unwrap_err();
    assert!(matches!(err, DiscoveryError::NotFound(_)));
}

#[test]
fn empty_directory_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let references = discover(dir.path(), &options(dir.path())).unwrap();
    assert!(references.is_empty());
}

#[test]
fn extension_match_ignores_case() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "LOUD.YAML");
    let references = discover(dir.path(), &options(dir.path())).unwrap();
    assert_eq!(references.len(), 1);
}

#[test]
fn custom_extension_list_is_honored() {
    let dir = tree();
    let options = DiscoveryOptions {
        extensions: vec!["json".to_string()],
        source_root: dir.path().to_path_buf(),
    };
    let references = discover(dir.path(), &options).unwrap();

    let found: Vec<_> = references.iter().map(|r| r.as_str()).collect();
    assert_eq!(found, vec!["./blog/deep/nested/post.json"]);
}
