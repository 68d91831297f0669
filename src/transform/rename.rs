use camino::Utf8PathBuf;

use crate::asset::Asset;
use crate::pipeline::Transform;

/// Renames a record, keeping its directory.
///
/// `Rename::suffix(".min")` turns `style.css` into `style.min.css`.
#[derive(Debug, Clone, Default)]
pub struct Rename {
    basename: Option<String>,
    suffix: Option<String>,
    extension: Option<String>,
}

impl Rename {
    /// Appends a suffix to the file stem.
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Some(suffix.into()),
            ..Default::default()
        }
    }

    /// Replaces the whole file name.
    pub fn to(basename: impl Into<String>) -> Self {
        Self {
            basename: Some(basename.into()),
            ..Default::default()
        }
    }

    /// Replaces the extension.
    pub fn extension(extension: impl Into<String>) -> Self {
        Self {
            extension: Some(extension.into()),
            ..Default::default()
        }
    }

    pub(crate) fn rename(&self, path: &Utf8PathBuf) -> Utf8PathBuf {
        if let Some(basename) = &self.basename {
            return path.with_file_name(basename);
        }

        let stem = path.file_stem().unwrap_or_default();
        let extension = self
            .extension
            .as_deref()
            .or_else(|| path.extension())
            .unwrap_or_default();
        let suffix = self.suffix.as_deref().unwrap_or_default();

        let name = if extension.is_empty() {
            format!("{stem}{suffix}")
        } else {
            format!("{stem}{suffix}.{extension}")
        };

        path.with_file_name(name)
    }
}

impl Transform for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        asset.path = self.rename(&asset.path);
        Ok(asset)
    }
}
