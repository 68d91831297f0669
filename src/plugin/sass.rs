use camino::{Utf8Path, Utf8PathBuf};
use grass::{Options, OutputStyle};

use crate::asset::Asset;
use crate::pipeline::Transform;

/// Compiles SCSS to CSS with `grass`.
///
/// Imports are resolved against the directory of the compiled file first,
/// then against the include paths in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Sass {
    include_paths: Vec<Utf8PathBuf>,
}

impl Sass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn include_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.include_paths.extend(paths.into_iter().map(Into::into));
        self
    }
}

impl Transform for Sass {
    fn name(&self) -> &str {
        "sass"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let parent = asset.origin.parent().unwrap_or(Utf8Path::new("."));

        let mut opts = Options::default()
            .style(OutputStyle::Expanded)
            .load_path(parent);
        for path in &self.include_paths {
            opts = opts.load_path(path);
        }

        let css = grass::from_string(asset.text()?.to_string(), &opts)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        asset.set_text(css);
        asset.path.set_extension("css");
        Ok(asset)
    }
}

/// Minifies CSS by re-emitting it in the compressed output style.
#[derive(Debug, Clone, Copy)]
pub struct MinifyCss;

impl Transform for MinifyCss {
    fn name(&self) -> &str {
        "minify-css"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let opts = Options::default().style(OutputStyle::Compressed);
        let css = grass::from_string(asset.text()?.to_string(), &opts)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        asset.set_text(css);
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_compile_with_include_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("vendor/normalize")).unwrap();
        fs::write(root.join("vendor/normalize/_normalize.scss"), "html { margin: 0; }").unwrap();

        let source = "@import 'normalize';\n$c: red;\na { .b { color: $c; } }\n";
        let asset = Asset::new(root.join("styles/style.scss"), "style.scss", source);

        let out = Sass::new()
            .include_path(root.join("vendor/normalize"))
            .apply(asset)
            .unwrap();

        assert_eq!(out.path, "style.css");
        let css = out.text().unwrap();
        assert!(css.contains("html {"));
        assert!(css.contains("a .b {\n  color: red;\n}"));
    }

    #[test]
    fn test_syntax_error() {
        let asset = Asset::new("style.scss", "style.scss", "a { color: red");
        assert!(Sass::new().apply(asset).is_err());
    }

    #[test]
    fn test_minify() {
        let asset = Asset::new("a.css", "a.css", "a {\n  color: red;\n}\n\nb {\n  margin: 0;\n}\n");
        let out = MinifyCss.apply(asset).unwrap();
        let css = out.text().unwrap();

        assert!(!css.trim_end().contains('\n'));
        assert!(css.contains("a{color:red}"));
        assert!(css.contains("b{margin:0}"));
    }
}
