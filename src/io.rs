use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::ClearError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Deletes files and directory trees. Paths that don't exist are ignored.
/// Returns the paths that were actually removed.
pub fn remove<I, P>(paths: I) -> Result<Vec<Utf8PathBuf>, ClearError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Utf8Path>,
{
    let s = Instant::now();
    let mut removed = Vec::new();

    for path in paths {
        let path = path.as_ref();

        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => Err(e),
        };

        result.map_err(|e| ClearError::Remove(path.to_path_buf(), e))?;
        removed.push(path.to_path_buf());
    }

    tracing::debug!("removed {} path(s) {}", removed.len(), as_overhead(s));

    Ok(removed)
}
