use std::path::Path;

#[test]
fn test_manifest_readmes_exist() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
    for krate in ["echem-app", "echem-core", "echem-schemas"] {
        let dir = root.join(krate);
        let manifest = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
        let readme = manifest
            .lines()
            .find_map(|l| l.strip_prefix("readme = "))
            .map(|v| v.trim().trim_matches('"'));
        if let Some(readme) = readme {
            assert!(dir.join(readme).is_file(), "{krate} names a missing {readme}");
        }
    }
}
