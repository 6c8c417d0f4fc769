use super::*;
use std::fs;
use tempfile::TempDir;

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create parent directories");
    }
    fs::write(&path, b"image").expect("should write file");
}

fn image_tree() -> TempDir {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();

    touch(root, "a.jpg");
    touch(root, "b.PNG");
    touch(root, "notes.txt");
    touch(root, "anim.gif");
    touch(root, ".hidden.jpg");
    touch(root, "__MACOSX/a.jpg");
    touch(root, ".thumbnails/t.jpg");
    touch(root, "nested/deeper/c.jpeg");
    touch(root, "nested/café.jpg");
    touch(root, "nested/bell\u{7}.jpg");

    temp_dir
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect()
}

#[test]
fn scan_applies_filters() {
    let tree = image_tree();
    let scanner = ImageScanner::new();

    let paths: Vec<PathBuf> = scanner.scan(tree.path()).expect("should scan").collect();

    assert_eq!(file_names(&paths), vec!["a.jpg", "b.PNG", "c.jpeg"]);
    assert!(paths.iter().all(|p| p.is_absolute()));
}

#[test]
fn count_matches_scan() {
    let tree = image_tree();
    let scanner = ImageScanner::new();

    assert_eq!(scanner.count(tree.path()).expect("should count"), 3);
    // Restartable: scanning twice yields the same sequence
    let first: Vec<PathBuf> = scanner.scan(tree.path()).expect("should scan").collect();
    let second: Vec<PathBuf> = scanner.scan(tree.path()).expect("should scan").collect();
    assert_eq!(first, second);
}

#[test]
fn custom_extensions() {
    let tree = image_tree();
    let scanner = ImageScanner::with_extensions([".GIF", " txt ", ""]);

    assert_eq!(scanner.extensions(), &["gif".to_string(), "txt".to_string()]);
    let paths: Vec<PathBuf> = scanner.scan(tree.path()).expect("should scan").collect();
    assert_eq!(file_names(&paths), vec!["anim.gif", "notes.txt"]);
}

#[test]
fn scanner_from_config() {
    let config = IngestConfig {
        extensions: vec!["png".to_string()],
        ..IngestConfig::default()
    };
    let tree = image_tree();

    let paths: Vec<PathBuf> = ImageScanner::from_config(&config)
        .scan(tree.path())
        .expect("should scan")
        .collect();
    assert_eq!(file_names(&paths), vec!["b.PNG"]);
}

#[test]
fn missing_root_is_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let missing = temp_dir.path().join("nope");

    assert!(matches!(
        ImageScanner::new().scan(&missing),
        Err(ImageSearchError::Io(_))
    ));
}

#[test]
fn file_root_is_rejected() {
    let tree = image_tree();
    let file = tree.path().join("a.jpg");

    assert!(matches!(
        ImageScanner::new().count(&file),
        Err(ImageSearchError::InvalidQuery(_))
    ));
}

#[test]
fn empty_directory_yields_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    assert_eq!(ImageScanner::new().count(temp_dir.path()).expect("should count"), 0);
}
