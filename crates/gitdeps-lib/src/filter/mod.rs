mod exclude;
mod ignore_file;

pub use exclude::ExcludedFolders;
pub use ignore_file::{IGNORE_FILE_NAME, IgnoreFile};

/// Combines folder exclusions and ignore-file rules. Excluded paths are never
/// downloaded or deleted.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    excluded_folders: ExcludedFolders,
    ignore_file: Option<IgnoreFile>,
}

impl PathFilter {
    pub fn new(excluded_folders: ExcludedFolders, ignore_file: Option<IgnoreFile>) -> Self {
        Self {
            excluded_folders,
            ignore_file,
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_folders.is_excluded(name)
            || self
                .ignore_file
                .as_ref()
                .is_some_and(|ignore| ignore.is_excluded_file(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_combines_both_sources() {
        let filter = PathFilter::new(
            ExcludedFolders::new(["Mac"]),
            Some(IgnoreFile::parse("*.pdb").unwrap()),
        );
        assert!(filter.is_excluded("Engine/Binaries/Mac/a.dylib"));
        assert!(filter.is_excluded("Engine/Binaries/Win64/a.pdb"));
        assert!(!filter.is_excluded("Engine/Binaries/Win64/a.dll"));
    }

    #[test]
    fn test_default_filter_excludes_nothing() {
        assert!(!PathFilter::default().is_excluded("anything"));
    }
}
