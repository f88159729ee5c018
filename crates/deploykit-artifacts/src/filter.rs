//! Glob-style file selection for hub downloads.
//!
//! Patterns follow shell `fnmatch` rules as used by the hub tooling:
//! `*` matches any run of characters (including `/`), `?` matches a single
//! character and `[...]` matches a character class.

use glob::{MatchOptions, Pattern};

use crate::error::ArtifactError;
use crate::Result;

/// Allow/ignore pattern set applied to repository-relative file paths.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    allow: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

impl FileFilter {
    /// Build a filter from allow and ignore glob patterns.
    ///
    /// An empty allow list admits every file; ignore patterns always win.
    pub fn new<A, I>(allow: &[A], ignore: &[I]) -> Result<Self>
    where
        A: AsRef<str>,
        I: AsRef<str>,
    {
        Ok(FileFilter {
            allow: compile_all(allow)?,
            ignore: compile_all(ignore)?,
        })
    }

    /// A filter that admits every file.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `path` passes the filter.
    pub fn matches(&self, path: &str) -> bool {
        let hit = |p: &Pattern| p.matches_with(path, MATCH_OPTIONS);
        let allowed = self.allow.is_empty() || self.allow.iter().any(hit);
        allowed && !self.ignore.iter().any(hit)
    }

    pub fn allow_patterns(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().map(Pattern::as_str)
    }

    pub fn ignore_patterns(&self) -> impl Iterator<Item = &str> {
        self.ignore.iter().map(Pattern::as_str)
    }
}

// `*` must cross `/` so `*.json` selects nested configs.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn compile_all<P: AsRef<str>>(patterns: &[P]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| compile_glob(p.as_ref())).collect()
}

fn compile_glob(pattern: &str) -> Result<Pattern> {
    if pattern.is_empty() {
        return Err(ArtifactError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "pattern must not be empty".to_string(),
        });
    }

    Pattern::new(pattern).map_err(|e| ArtifactError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_allow_all_matches_everything() {
        let filter = FileFilter::allow_all();
        assert!(filter.matches("config.json"));
        assert!(filter.matches("nested/dir/file.bin"));
    }

    #[test]
    fn test_allow_patterns_select_files() {
        let filter = FileFilter::new(&["*.json", "*.safetensors", "tokenizer.model"], &NONE).unwrap();
        assert!(filter.matches("config.json"));
        assert!(filter.matches("model-00001-of-00002.safetensors"));
        assert!(filter.matches("tokenizer.model"));
        assert!(!filter.matches("pytorch_model.bin"));
        assert!(!filter.matches("README.md"));
    }

    #[test]
    fn test_ignore_wins_over_allow() {
        let filter = FileFilter::new(&["*"], &["*.bin", "*.pth"]).unwrap();
        assert!(filter.matches("model.safetensors"));
        assert!(!filter.matches("pytorch_model-00001-of-00002.bin"));
        assert!(!filter.matches("consolidated.00.pth"));
    }

    #[test]
    fn test_star_crosses_directories() {
        let filter = FileFilter::new(&["*.json"], &NONE).unwrap();
        assert!(filter.matches("1_Pooling/config.json"));
    }

    #[test]
    fn test_question_mark_and_literal_dots() {
        let filter = FileFilter::new(&["model-?.safetensors"], &NONE).unwrap();
        assert!(filter.matches("model-1.safetensors"));
        assert!(!filter.matches("model-10.safetensors"));
        assert!(!filter.matches("model-1xsafetensors"));
    }

    #[test]
    fn test_character_class_selects_shards() {
        let filter = FileFilter::new(&["model-0000[12]-of-00002.safetensors"], &NONE).unwrap();
        assert!(filter.matches("model-00001-of-00002.safetensors"));
        assert!(filter.matches("model-00002-of-00002.safetensors"));
        assert!(!filter.matches("model-00003-of-00002.safetensors"));
        assert!(!filter.matches("model-0000[12]-of-00002.safetensors"));
    }

    #[test]
    fn test_unclosed_class_rejected() {
        let err = FileFilter::new(&["model-[12.safetensors"], &NONE).unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPattern { .. }));
    }

    #[test]
    fn test_patterns_are_reported_verbatim() {
        let filter = FileFilter::new(&["*.json"], &["*.bin"]).unwrap();
        assert_eq!(filter.allow_patterns().collect::<Vec<_>>(), vec!["*.json"]);
        assert_eq!(filter.ignore_patterns().collect::<Vec<_>>(), vec!["*.bin"]);
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let err = FileFilter::new(&[""], &NONE).unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPattern { .. }));
    }
}
