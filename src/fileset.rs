//! File sets: the resolved list of input files a task will process.
//!
//! A [`FileSet`] is described by glob patterns. Patterns prefixed with `!` are
//! exclusions. Every match remembers its *glob base* (the static part of the
//! pattern before the first wildcard), so that destination paths can keep
//! the layout of the source tree relative to that base.

use std::collections::HashSet;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};

use crate::error::FileSetError;

/// A single matched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Full path to the file.
    pub path: Utf8PathBuf,
    /// The glob base the file was matched under.
    pub base: Utf8PathBuf,
}

impl Entry {
    /// Path of the file relative to its glob base.
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct FileSet {
    include: Vec<String>,
    exclude: Vec<Pattern>,
    changed: Option<Utf8PathBuf>,
}

impl FileSet {
    /// Creates a file set from glob patterns. Patterns starting with `!`
    /// exclude matching paths from the set.
    pub fn new<I, S>(patterns: I) -> Result<Self, FileSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match pattern.strip_prefix('!') {
                Some(negated) => exclude.push(Pattern::new(&normalize(negated))?),
                None => {
                    // Validate eagerly so that a bad pattern fails at declaration.
                    Pattern::new(pattern)?;
                    include.push(normalize(pattern));
                }
            }
        }

        Ok(Self {
            include,
            exclude,
            changed: None,
        })
    }

    /// Keep only files whose counterpart under `dest` (same path relative to
    /// the glob base) is missing or older than the source.
    pub fn changed(mut self, dest: impl Into<Utf8PathBuf>) -> Self {
        self.changed = Some(dest.into());
        self
    }

    /// Resolves the patterns against the file system. The result is ordered
    /// by pattern, then alphabetically, and contains every file at most
    /// once. Directories are skipped.
    pub fn resolve(&self) -> Result<Vec<Entry>, FileSetError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for pattern in &self.include {
            let base = glob_base(pattern);

            for path in glob(pattern)? {
                let path = Utf8PathBuf::try_from(path?)?;

                if !path.is_file() {
                    continue;
                }

                if self.exclude.iter().any(|p| p.matches(path.as_str())) {
                    continue;
                }

                if !seen.insert(path.clone()) {
                    continue;
                }

                entries.push(Entry {
                    path,
                    base: base.clone(),
                });
            }
        }

        if let Some(dest) = &self.changed {
            let mut fresh = Vec::with_capacity(entries.len());
            for entry in entries {
                if is_changed(&entry, dest)? {
                    fresh.push(entry);
                }
            }
            entries = fresh;
        }

        Ok(entries)
    }
}

/// Strips a leading `./`, which `glob` would otherwise keep out of matches.
fn normalize(pattern: &str) -> String {
    pattern.strip_prefix("./").unwrap_or(pattern).to_string()
}

/// Static part of a glob pattern. For a pattern without wildcards this is the
/// parent directory of the named file.
pub(crate) fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
    {
        Some(split) => components.iter().take(split).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

fn is_changed(entry: &Entry, dest: &Utf8Path) -> Result<bool, FileSetError> {
    let target = dest.join(entry.relative());

    let target_time = match fs::metadata(&target) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    let source_time = fs::metadata(&entry.path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);

    Ok(source_time > target_time)
}
