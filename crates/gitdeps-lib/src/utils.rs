use crate::error::GitDepsError;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Rejects names that would resolve outside the root: absolute paths, drive
/// prefixes and `..` components.
pub fn validate_relative_name(name: &str) -> Result<(), GitDepsError> {
    let normalized = name.replace('\\', "/");
    let unsafe_name = normalized.is_empty()
        || normalized.starts_with('/')
        || normalized.contains(':')
        || normalized.split('/').any(|component| component == "..");
    if unsafe_name {
        return Err(GitDepsError::UnsafePath {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Case-insensitive identity of a relative file name. Every comparison of
/// file names goes through this key.
pub fn name_key(name: &str) -> String {
    name.replace('\\', "/").to_lowercase()
}

pub fn names_equal(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}

pub fn resolve_in_root(root: &Path, name: &str) -> PathBuf {
    root.join(name.replace('\\', "/"))
}

/// Modification time in nanoseconds since the unix epoch. Zero is reserved
/// for "not written yet", so real timestamps are clamped to at least one.
pub fn modified_nanos(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
        .max(1)
}

pub fn file_timestamp(path: &Path) -> Result<i64, GitDepsError> {
    let metadata =
        std::fs::metadata(path).map_err(|e| GitDepsError::filesystem("stat", path, e))?;
    Ok(modified_nanos(&metadata))
}

/// Deletes a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<(), GitDepsError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GitDepsError::filesystem("delete file", path, e)),
    }
}

/// Best-effort delete used on cleanup paths where a failure is not actionable.
pub fn remove_file_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), "Failed to remove file: {}", e);
    }
}

pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Adds execute permission wherever read permission is granted.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    let new_mode = mode | ((mode >> 2) & 0o111);
    if new_mode != mode {
        permissions.set_mode(new_mode);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_relative_name_accepts_nested_paths() {
        assert!(validate_relative_name("Engine/Binaries/tool.dll").is_ok());
        assert!(validate_relative_name("Engine\\Binaries\\tool.dll").is_ok());
        assert!(validate_relative_name("a..b/c").is_ok());
    }

    #[test]
    fn test_validate_relative_name_rejects_escapes() {
        assert!(validate_relative_name("").is_err());
        assert!(validate_relative_name("/etc/passwd").is_err());
        assert!(validate_relative_name("C:/Windows/evil.dll").is_err());
        assert!(validate_relative_name("Engine/../../evil").is_err());
        assert!(validate_relative_name("..\\evil").is_err());
    }

    #[test]
    fn test_names_equal_folds_unicode_case_and_separators() {
        assert!(names_equal("Engine/Binaries/Tool.DLL", "engine\\binaries\\tool.dll"));
        assert!(names_equal("Ünïcode/Ä.bin", "ünïcode/ä.BIN"));
        assert!(!names_equal("a.bin", "b.bin"));
        assert_eq!(name_key("Ä/B.bin"), "ä/b.bin");
    }

    #[test]
    fn test_append_suffix() {
        assert_eq!(
            append_suffix(Path::new("dir/file.bin"), ".incoming"),
            PathBuf::from("dir/file.bin.incoming")
        );
    }

    #[test]
    fn test_remove_file_if_exists_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_file_if_exists(&dir.path().join("missing")).is_ok());
    }

    #[test]
    fn test_modified_nanos_is_never_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();
        assert!(file_timestamp(&path).unwrap() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_set_executable_mirrors_read_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        set_executable(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
