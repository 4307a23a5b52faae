//! Expansion of `--data-files` patterns into per-table dump files.

use crate::reader::{Compression, DumpSource, FileSource};
use std::path::{Path, PathBuf};

/// Check if a path string contains glob pattern characters.
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

/// True for `.sql` files and their compressed forms
fn is_dump_file(path: &Path) -> bool {
    let stem = match Compression::from_path(path) {
        Compression::None => path.to_path_buf(),
        _ => path.with_extension(""),
    };
    stem.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
}

/// Dump files matching `pattern`, sorted, excluding `schema_file`.
///
/// A literal directory expands to the dump files directly inside it.
pub fn expand_data_files(pattern: &str, schema_file: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = if !is_glob_pattern(pattern) && Path::new(pattern).is_dir() {
        Path::new(pattern).join("*").to_string_lossy().into_owned()
    } else {
        pattern.to_string()
    };

    let mut files = Vec::new();
    let entries = glob::glob(&pattern)
        .map_err(|e| anyhow::anyhow!("invalid glob pattern '{}': {}", pattern, e))?;
    for entry in entries {
        let path =
            entry.map_err(|e| anyhow::anyhow!("error reading path for pattern '{}': {}", pattern, e))?;
        if path.is_file() && is_dump_file(&path) && !same_file(&path, schema_file) {
            files.push(path);
        }
    }

    if files.is_empty() {
        anyhow::bail!("no dump files match pattern: {}", pattern);
    }
    files.sort();
    Ok(files)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub fn file_sources(files: Vec<PathBuf>) -> Vec<Box<dyn DumpSource>> {
    files
        .into_iter()
        .map(|f| Box::new(FileSource::new(f)) as Box<dyn DumpSource>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_glob_pattern() {
        assert!(!is_glob_pattern("tables/users.sql"));
        assert!(is_glob_pattern("tables/*.sql"));
        assert!(is_glob_pattern("**/*.sql.gz"));
        assert!(is_glob_pattern("part?.sql"));
    }

    #[test]
    fn test_expand_directory_skips_schema_and_other_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("users.sql"), "").unwrap();
        fs::write(dir.path().join("orders.sql.gz"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("_schema.sql"), "").unwrap();

        let schema = dir.path().join("_schema.sql");
        let files = expand_data_files(&dir.path().to_string_lossy(), &schema).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["orders.sql.gz", "users.sql"]);
    }

    #[test]
    fn test_expand_glob_no_matches() {
        let dir = TempDir::new().unwrap();
        let pattern = dir.path().join("*.sql");
        let err = expand_data_files(&pattern.to_string_lossy(), Path::new("x.sql")).unwrap_err();
        assert!(err.to_string().contains("no dump files match"));
    }
}
