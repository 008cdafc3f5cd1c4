use crate::error::GitDepsError;
use regex::{Regex, RegexBuilder};
use std::path::Path;

pub const IGNORE_FILE_NAME: &str = ".gitdepsignore";

#[derive(Debug, Clone)]
struct IgnorePattern {
    regex: Regex,
    exclude: bool,
}

/// Gitignore-style rules: `#` comments, `!` negation, `?`, `*` and `**`
/// wildcards, a leading `/` anchors to the root and a trailing `/` matches
/// everything below a folder. The last matching rule decides.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFile {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreFile {
    pub fn load(path: &Path) -> Result<Self, GitDepsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GitDepsError::filesystem("read ignore file", path, e))?;
        Self::parse(&content).map_err(|e| GitDepsError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Loads `<root>/.gitdepsignore` when it exists.
    pub fn load_from_root(root: &Path) -> Result<Option<Self>, GitDepsError> {
        let path = root.join(IGNORE_FILE_NAME);
        if path.is_file() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn parse(content: &str) -> Result<Self, regex::Error> {
        let mut patterns = Vec::new();
        for line in content.lines() {
            let mut line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut exclude = true;
            if let Some(rest) = line.strip_prefix('!') {
                line = rest.trim_start();
                exclude = false;
            }

            patterns.push(IgnorePattern {
                regex: compile_pattern(line)?,
                exclude,
            });
        }
        Ok(Self { patterns })
    }

    pub fn is_excluded_file(&self, file_path: &str) -> bool {
        let mut normalized = file_path.replace('\\', "/");
        if !normalized.starts_with('/') {
            normalized.insert(0, '/');
        }

        let mut excluded = false;
        for pattern in &self.patterns {
            if excluded != pattern.exclude && pattern.regex.is_match(&normalized) {
                excluded = pattern.exclude;
            }
        }
        excluded
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = pattern.replace('\\', "/");
    let mut expression = regex::escape(&pattern)
        .replace(r"\?", ".")
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*");

    if !expression.starts_with('/') {
        expression.insert(0, '/');
    }
    expression.insert(0, '^');
    if !expression.ends_with('/') {
        expression.push('$');
    }
    // Unanchored rules may start at any folder boundary.
    if !pattern.starts_with('/') {
        expression.replace_range(..1, "(^|.*)");
    }

    RegexBuilder::new(&expression).case_insensitive(true).build()
}
