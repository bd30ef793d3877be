//! Expansion of requested files and folders into source paths

use crate::error::{ListmanError, Result};

use hashbrown::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What the operator asked to merge
#[derive(Debug, Clone, Default)]
pub struct InputSpec {
    pub files: Vec<PathBuf>,
    pub folders: Vec<PathBuf>,
    /// Lowercase extensions picked up from folders
    pub extensions: Vec<String>,
    pub recursive: bool,
}

/// Canonical, deduplicated list of source files. Paths in `exclude` (the
/// master list, resume state and log) are never returned.
pub fn enumerate(spec: &InputSpec, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen: HashSet<PathBuf> = exclude.iter().cloned().collect();
    let mut files = Vec::new();

    for path in &spec.files {
        let canonical = canonicalize(path)?;
        if !canonical.is_file() {
            return Err(ListmanError::enumeration(path, "not a regular file"));
        }
        if seen.insert(canonical.clone()) {
            files.push(canonical);
        }
    }

    for folder in &spec.folders {
        let canonical = canonicalize(folder)?;
        if !canonical.is_dir() {
            return Err(ListmanError::enumeration(folder, "not a directory"));
        }

        let walker = if spec.recursive {
            WalkDir::new(&canonical)
        } else {
            WalkDir::new(&canonical).max_depth(1)
        };

        for entry in walker.sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| canonical.clone(), Path::to_path_buf);
                ListmanError::enumeration(&path, e.to_string())
            })?;
            let path = entry.path();

            if path.is_file() && matches_extension(path, &spec.extensions) {
                let file = canonicalize(path)?;
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        }
    }

    log::debug!("Enumerated {} source files", files.len());
    Ok(files)
}

/// Case-insensitive extension check against a list of lowercase extensions
pub fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| ListmanError::enumeration(path, e.to_string()))
}
