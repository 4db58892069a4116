use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Everything a single build needs, fixed at submission time.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Extracted upload folder handed over by the transport layer.
    pub folder: PathBuf,
    pub image_name: String,
    /// Tags applied to the built image. Normalized to `["latest"]` by the
    /// pipeline when empty.
    pub tags: Vec<String>,
    /// Dotted module paths the built image must be able to import.
    pub imports: Vec<String>,
    /// pip requirement specifiers installed next to the package.
    pub requirements: Vec<String>,
    /// apt packages installed into the image.
    pub os_packages: Vec<String>,
    pub base_image: Option<String>,
}

fn module_rel_path(import: &str) -> PathBuf {
    PathBuf::from(import.trim_matches(|c| c == '.' || c == '/').replace('.', "/"))
}

fn resolves_in(dir: &Path, import: &str) -> bool {
    let rel = module_rel_path(import);
    dir.join(&rel).with_extension("py").is_file() || dir.join(&rel).join("__init__.py").is_file()
}

/// Walk the uploaded tree and return the first directory under which every
/// requested import resolves to a module file or package marker. The walk is
/// pre-order with siblings in lexical order, so the result is deterministic.
///
/// A directory matching only part of the imports means the upload is
/// ambiguous or incomplete; that aborts the build rather than guessing.
pub fn find_package_root(folder: &Path, imports: &[String]) -> Result<PathBuf> {
    for entry in WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        let found = imports.iter().filter(|import| resolves_in(dir, import)).count();

        if found == 0 {
            continue;
        }
        if found != imports.len() {
            return Err(Error::AmbiguousPackageRoot {
                path: dir.to_path_buf(),
                found,
                expected: imports.len(),
            });
        }

        info!("found package root at {}", dir.display());
        return Ok(dir.to_path_buf());
    }

    Err(Error::PackageRootNotFound {
        imports: imports.join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn imports(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_finds_root_for_module_file() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let pkg_dir = tmp.path().join("upload").join("mypkg");
        fs::create_dir_all(&pkg_dir).expect("failed to create package dir");
        fs::write(pkg_dir.join("job.py"), "").expect("failed to write module");

        let root = find_package_root(tmp.path(), &imports(&["mypkg.job"]))
            .expect("package root not found");
        assert_eq!(root, tmp.path().join("upload"));
    }

    #[test]
    fn test_finds_root_for_package_marker() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let pkg_dir = tmp.path().join("mypkg");
        fs::create_dir_all(&pkg_dir).expect("failed to create package dir");
        fs::write(pkg_dir.join("__init__.py"), "").expect("failed to write marker");

        let root =
            find_package_root(tmp.path(), &imports(&["mypkg"])).expect("package root not found");
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn test_imports_split_across_directories_is_fatal() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        fs::create_dir_all(tmp.path().join("a")).expect("failed to create dir");
        fs::create_dir_all(tmp.path().join("b")).expect("failed to create dir");
        fs::write(tmp.path().join("a").join("one.py"), "").expect("failed to write module");
        fs::write(tmp.path().join("b").join("two.py"), "").expect("failed to write module");

        let err = find_package_root(tmp.path(), &imports(&["one", "two"]))
            .expect_err("partial match should abort");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(matches!(err, Error::AmbiguousPackageRoot { found: 1, expected: 2, .. }));
    }

    #[test]
    fn test_no_match_anywhere_is_fatal() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        fs::write(tmp.path().join("readme.txt"), "").expect("failed to write file");

        let err = find_package_root(tmp.path(), &imports(&["mypkg.job"]))
            .expect_err("missing package should abort");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(matches!(err, Error::PackageRootNotFound { .. }));
    }

    #[test]
    fn test_first_full_match_in_lexical_order_wins() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        for name in ["second", "first"] {
            let dir = tmp.path().join(name);
            fs::create_dir_all(&dir).expect("failed to create dir");
            fs::write(dir.join("mypkg.py"), "").expect("failed to write module");
        }

        let root = find_package_root(tmp.path(), &imports(&["mypkg"]))
            .expect("package root not found");
        assert_eq!(root, tmp.path().join("first"));
    }

    #[test]
    fn test_dotted_import_with_stray_separators() {
        assert_eq!(module_rel_path("./mypkg.job"), PathBuf::from("mypkg/job"));
        assert_eq!(module_rel_path("mypkg.sub.job"), PathBuf::from("mypkg/sub/job"));
    }
}
