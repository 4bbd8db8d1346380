use std::path::{Component, Path};

use crate::ValidationError;

/// Stats a local input and returns its size.
///
/// Rejects directories (no recursive folder upload) and anything that is
/// not a regular file.
pub fn validate_local_file(path: &Path) -> Result<u64, ValidationError> {
    let display = path.display().to_string();
    let metadata = std::fs::metadata(path).map_err(|source| ValidationError::Io {
        path: display.clone(),
        source,
    })?;

    if metadata.is_dir() {
        return Err(ValidationError::Directory(display));
    }
    if !metadata.is_file() {
        return Err(ValidationError::InvalidName(format!(
            "not a regular file: {display}"
        )));
    }

    Ok(metadata.len())
}

/// Checks the file extension against an allow-list (case-insensitive).
///
/// An empty allow-list accepts everything.
pub fn validate_extension(path: &Path, allowed: &[String]) -> Result<(), ValidationError> {
    if allowed.is_empty() {
        return Ok(());
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext {
        Some(ext) if allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => Ok(()),
        _ => Err(ValidationError::DisallowedType(path.display().to_string())),
    }
}

/// Validates a relative remote path built from a prefix and a file name.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_remote_name(remote: &str) -> Result<(), ValidationError> {
    if remote.is_empty() {
        return Err(ValidationError::InvalidName("empty path".into()));
    }

    let path = Path::new(remote);

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ValidationError::InvalidName(format!(
                    "parent directory traversal not allowed: {remote}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(ValidationError::InvalidName(format!(
                    "absolute path not allowed: {remote}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
