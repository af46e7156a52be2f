use std::path::{Path, PathBuf};

/// Directory inside the vault holding everything this crate writes
pub const DATA_DIR: &str = ".embeddings";

pub struct VaultPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub records: PathBuf,
    pub database: PathBuf,
    pub config: PathBuf,
}

impl VaultPaths {
    pub fn from_root(root: PathBuf) -> Self {
        let data = root.join(DATA_DIR);
        Self {
            records: data.join("records"),
            database: data.join("index.db"),
            config: data.join("config.json"),
            data,
            root,
        }
    }

    /// Vault-relative note path for an absolute filesystem path
    ///
    /// Returns `None` for paths outside the vault.
    pub fn relative_note_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let normalized = normalize_note_path(&joined);
        (!normalized.is_empty()).then_some(normalized)
    }

    pub fn note_file(&self, note_path: &str) -> PathBuf {
        self.root.join(normalize_note_path(note_path))
    }
}

impl Clone for VaultPaths {
    fn clone(&self) -> Self {
        Self::from_root(self.root.clone())
    }
}

/// Normalize a vault-relative path into its canonical key form
///
/// Backslashes become `/`, empty and `.` segments are dropped, and the
/// result never starts or ends with a separator.
pub fn normalize_note_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a path lives under a hidden (`.`-prefixed) directory or is hidden itself
pub fn is_hidden(note_path: &str) -> bool {
    normalize_note_path(note_path)
        .split('/')
        .any(|segment| segment.starts_with('.'))
}

/// Path-prefix exclusion list
///
/// Each entry is normalized to begin with `/` and matched against whole
/// path segments: excluding `foo` hides `foo` and `foo/bar.md` but not
/// `foobar.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    prefixes: Vec<String>,
}

impl Exclusions {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes: Vec<String> = entries
            .into_iter()
            .map(|e| normalize_note_path(e.as_ref().trim()))
            .filter(|e| !e.is_empty())
            .map(|e| format!("/{e}"))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Self { prefixes }
    }

    pub fn is_excluded(&self, note_path: &str) -> bool {
        let rooted = format!("/{}", normalize_note_path(note_path));
        self.prefixes.iter().any(|prefix| {
            rooted
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_note_path() {
        assert_eq!(normalize_note_path("Notes/a.md"), "Notes/a.md");
        assert_eq!(normalize_note_path("/Notes//a.md"), "Notes/a.md");
        assert_eq!(normalize_note_path("./Notes/./a.md/"), "Notes/a.md");
        assert_eq!(normalize_note_path("Notes\\Sub\\a.md"), "Notes/Sub/a.md");
        assert_eq!(normalize_note_path(""), "");
    }

    #[test]
    fn test_exclusion_matches_whole_segments() {
        let exclusions = Exclusions::new(["foo"]);
        assert!(exclusions.is_excluded("foo"));
        assert!(exclusions.is_excluded("foo/bar.md"));
        assert!(exclusions.is_excluded("/foo/deep/er.md"));
        assert!(!exclusions.is_excluded("foobar.md"));
        assert!(!exclusions.is_excluded("other/foo/bar.md"));
    }

    #[test]
    fn test_exclusion_entries_are_normalized() {
        let exclusions = Exclusions::new(["/Templates/", "Archive\\Old", "", "  "]);
        assert!(exclusions.is_excluded("Templates/daily.md"));
        assert!(exclusions.is_excluded("Archive/Old/x.md"));
        assert!(!exclusions.is_excluded("Archive/New/x.md"));
        assert_eq!(exclusions.prefixes().len(), 2);
    }

    #[test]
    fn test_exclusion_file_entry() {
        let exclusions = Exclusions::new(["inbox.md"]);
        assert!(exclusions.is_excluded("inbox.md"));
        assert!(!exclusions.is_excluded("inbox.md.bak"));
    }

    #[test]
    fn test_relative_note_path() {
        let paths = VaultPaths::from_root(PathBuf::from("/vault"));
        assert_eq!(
            paths.relative_note_path(Path::new("/vault/Notes/a.md")),
            Some("Notes/a.md".to_string())
        );
        assert_eq!(paths.relative_note_path(Path::new("/elsewhere/a.md")), None);
        assert_eq!(paths.relative_note_path(Path::new("/vault")), None);
    }

    #[test]
    fn test_hidden_paths() {
        assert!(is_hidden(".embeddings/records/x.json"));
        assert!(is_hidden("Notes/.trash/a.md"));
        assert!(!is_hidden("Notes/a.md"));
    }
}
