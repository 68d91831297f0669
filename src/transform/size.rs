use std::io::Write;

use console::style;
use flate2::Compression;
use flate2::write::GzEncoder;
use indicatif::HumanBytes;

use crate::asset::Asset;
use crate::pipeline::Transform;

/// Logs the size of every record passing through, optionally gzipped.
#[derive(Debug, Clone)]
pub struct Size {
    title: String,
    gzip: bool,
}

impl Size {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            gzip: false,
        }
    }

    /// Reports the size after gzip compression instead of the raw size.
    pub fn gzip(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            gzip: true,
        }
    }

    fn measure(&self, data: &[u8]) -> anyhow::Result<usize> {
        if !self.gzip {
            return Ok(data.len());
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data)?;
        Ok(encoder.finish()?.len())
    }

    fn summary(&self, asset: &Asset) -> anyhow::Result<String> {
        let size = self.measure(&asset.data)?;
        Ok(format!("{} {}", asset.path, HumanBytes(size as u64)))
    }
}

impl Transform for Size {
    fn name(&self) -> &str {
        "size"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Asset> {
        tracing::info!("{} {}", style(&self.title).cyan(), self.summary(&asset)?);

        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_smaller_for_repetitive_input() {
        let data = "a { color: red; }\n".repeat(200);
        let plain = Size::new("css").measure(data.as_bytes()).unwrap();
        let gzip = Size::gzip("css").measure(data.as_bytes()).unwrap();

        assert_eq!(plain, data.len());
        assert!(gzip < plain / 10);
    }

    #[test]
    fn test_summary() {
        let asset = Asset::new("style.scss", "style.css", vec![b'a'; 2048]);
        assert_eq!(Size::new("styles").summary(&asset).unwrap(), "style.css 2.00 KiB");
    }
}
