use crate::asset::{Asset, SourceMap};
use crate::pipeline::Transform;

/// Starts a source map for every record, capturing the original file name
/// and contents before any compile step runs.
///
/// The map travels with the record through the rest of the chain and is
/// written as a `.map` sidecar by the destination writer.
#[derive(Debug, Clone, Copy)]
pub struct SourceMaps;

impl Transform for SourceMaps {
    fn name(&self) -> &str {
        "sourcemaps"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let source = asset.path.as_str().to_string();
        let content = String::from_utf8_lossy(&asset.data).into_owned();

        asset.sourcemap = Some(SourceMap::new(source, content));
        Ok(asset)
    }
}
