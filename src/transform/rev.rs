use crate::asset::Asset;
use crate::core::Hash32;
use crate::pipeline::Transform;

/// Appends a content hash to the file stem for cache busting:
/// `app.min.js` becomes `app.min-0a1b2c3d.js`.
#[derive(Debug, Clone, Copy)]
pub struct Rev {
    length: usize,
}

impl Rev {
    pub fn new() -> Self {
        Self { length: 8 }
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = length.clamp(4, 64);
        self
    }
}

impl Default for Rev {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Rev {
    fn name(&self) -> &str {
        "rev"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let hash = Hash32::hash(&asset.data).to_hex();
        let hash = &hash[..self.length];

        let stem = asset.path.file_stem().unwrap_or_default();
        let name = match asset.path.extension() {
            Some(ext) => format!("{stem}-{hash}.{ext}"),
            None => format!("{stem}-{hash}"),
        };

        asset.path = asset.path.with_file_name(name);
        Ok(asset)
    }
}
