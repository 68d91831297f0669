//! In-flight records and the writers that put them on disk.
//!
//! An [`Asset`] is one record flowing through a transform chain: the bytes of
//! a file plus enough path information to derive its destination. A
//! [`Dest`] writes assets below a destination root, keeping each asset's path
//! relative to the glob base it was matched under.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::WriteError;
use crate::fileset::Entry;

/// A version 3 source map.
///
/// The delegated compilers don't report token positions, so the map lists
/// the original sources and their contents without fine-grained mappings.
/// That is enough for browser dev tools to show the original files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: String::new(),
            sources: vec![source.into()],
            sources_content: vec![content.into()],
            names: Vec::new(),
            mappings: String::new(),
        }
    }

    /// Appends the sources of another map, used when records are merged.
    pub fn extend(&mut self, other: SourceMap) {
        self.sources.extend(other.sources);
        self.sources_content.extend(other.sources_content);
    }
}

/// One record flowing through a transform chain.
#[derive(Debug, Clone)]
pub struct Asset {
    /// The source file this record originated from (used in error reports).
    pub origin: Utf8PathBuf,
    /// Path relative to the destination root.
    pub path: Utf8PathBuf,
    /// File contents.
    pub data: Vec<u8>,
    /// Source map, when one was initialised for this record.
    pub sourcemap: Option<SourceMap>,
}

impl Asset {
    pub fn new(origin: impl Into<Utf8PathBuf>, path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
            data: data.into(),
            sourcemap: None,
        }
    }

    /// Reads a matched file from disk.
    pub fn read(entry: &Entry) -> std::io::Result<Self> {
        let data = fs::read(&entry.path)?;
        Ok(Self::new(&entry.path, entry.relative(), data))
    }

    /// The contents as UTF-8 text.
    pub fn text(&self) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.data = text.into().into_bytes();
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension()
    }
}

/// Writes assets below a destination root.
#[derive(Debug, Clone)]
pub struct Dest {
    root: Utf8PathBuf,
}

impl Dest {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Writes a single asset and returns the paths written. Assets carrying a
    /// source map get a `.map` sidecar and a `sourceMappingURL` comment.
    pub fn write(&self, asset: &Asset) -> Result<Vec<Utf8PathBuf>, WriteError> {
        let path = self.root.join(&asset.path);

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| WriteError {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let Some(map) = &asset.sourcemap else {
            write(&path, &asset.data)?;
            return Ok(vec![path]);
        };

        let name = asset.file_name();
        let map_name = format!("{name}.map");
        let map_path = path.with_file_name(&map_name);

        let mut map = map.clone();
        map.file = name.to_string();
        let json = serde_json::to_vec(&map).map_err(|e| WriteError {
            path: map_path.clone(),
            source: std::io::Error::other(e),
        })?;

        let mut data = asset.data.clone();
        data.extend_from_slice(mapping_comment(&asset.path, &map_name).as_bytes());

        write(&path, &data)?;
        write(&map_path, &json)?;

        Ok(vec![path, map_path])
    }
}

fn write(path: &Utf8Path, data: &[u8]) -> Result<(), WriteError> {
    fs::write(path, data).map_err(|source| WriteError {
        path: path.to_path_buf(),
        source,
    })
}

fn mapping_comment(path: &Utf8Path, map_name: &str) -> String {
    match path.extension() {
        Some("css") => format!("\n/*# sourceMappingURL={map_name} */\n"),
        _ => format!("\n//# sourceMappingURL={map_name}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_write_plain() {
        let (_dir, root) = tempdir();
        let dest = Dest::new(root.join("public"));
        let asset = Asset::new("app/scripts/app.js", "nested/app.js", "let a = 1;");

        let written = dest.write(&asset).unwrap();

        assert_eq!(written, vec![root.join("public/nested/app.js")]);
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), "let a = 1;");
    }

    #[test]
    fn test_write_with_sourcemap() {
        let (_dir, root) = tempdir();
        let dest = Dest::new(&root);
        let mut asset = Asset::new("app/styles/style.scss", "style.css", "a {\n  color: red;\n}\n");
        asset.sourcemap = Some(SourceMap::new("style.scss", "a { color: red; }"));

        let written = dest.write(&asset).unwrap();
        assert_eq!(written.len(), 2);

        let css = fs::read_to_string(root.join("style.css")).unwrap();
        assert!(css.ends_with("/*# sourceMappingURL=style.css.map */\n"));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(root.join("style.css.map")).unwrap()).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "style.css");
        assert_eq!(map["sources"][0], "style.scss");
        assert_eq!(map["sourcesContent"][0], "a { color: red; }");
    }
}
