//! Locating optional real-data test files.
//!
//! Real ERA5 downloads are large and need credentials, so tests that use
//! them skip when the files are absent. Files are looked up in
//! `$TEST_DATA_DIR`, then in each crate's `testdata/`, then in `testdata/`
//! at the workspace root.

use std::path::PathBuf;

/// Workspace root, two levels above this crate's manifest.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .map(|p| p.to_path_buf())
        .unwrap_or(manifest_dir)
}

/// First existing candidate for `name`, if any.
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let root = workspace_root();
    std::env::var_os("TEST_DATA_DIR")
        .map(|dir| PathBuf::from(dir).join(name))
        .into_iter()
        .chain([
            root.join("crates/grib-parser/testdata").join(name),
            root.join("crates/era5-ingest/testdata").join(name),
            root.join("testdata").join(name),
        ])
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_has_manifest() {
        let root = workspace_root();
        assert!(root.join("Cargo.toml").exists(), "no Cargo.toml in {:?}", root);
        assert!(root.join("crates").join("test-utils").exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(find_test_file("definitely_not_here_1901_01.grib").is_none());
    }
}
