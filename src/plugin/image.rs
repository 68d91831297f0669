use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::imageops::FilterType as ResizeFilter;
use image::{DynamicImage, ImageEncoder, ImageFormat};
use indicatif::HumanBytes;

use crate::asset::Asset;
use crate::pipeline::Transform;

/// Losslessly re-encodes raster images, keeping the result only when it is
/// smaller than the input.
///
/// PNG files are re-encoded with the compression effort selected by the
/// optimization level (0-7). Other formats pass through untouched.
#[derive(Debug, Clone, Copy)]
pub struct ImageMin {
    level: u8,
}

impl ImageMin {
    pub fn new(level: u8) -> Self {
        Self { level: level.min(7) }
    }

    fn compression(&self) -> CompressionType {
        match self.level {
            0..=1 => CompressionType::Fast,
            2..=4 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }

    fn filter(&self) -> FilterType {
        match self.level {
            0 => FilterType::NoFilter,
            _ => FilterType::Adaptive,
        }
    }

    pub(crate) fn optimize_png(&self, image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut buffer, self.compression(), self.filter());
        encoder.write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )?;
        Ok(buffer)
    }
}

impl Default for ImageMin {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Transform for ImageMin {
    fn name(&self) -> &str {
        "imagemin"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let Ok(ImageFormat::Png) = image::guess_format(&asset.data) else {
            tracing::trace!(path = %asset.path, "not a PNG, kept as is");
            return Ok(asset);
        };

        let image = image::load_from_memory_with_format(&asset.data, ImageFormat::Png)?;
        let optimized = self.optimize_png(&image)?;

        if optimized.len() < asset.data.len() {
            tracing::debug!(
                path = %asset.path,
                before = %HumanBytes(asset.data.len() as u64),
                after = %HumanBytes(optimized.len() as u64),
                "optimized"
            );
            asset.data = optimized;
        }

        Ok(asset)
    }
}

/// Scales raster images by a constant factor, keeping their format.
#[derive(Debug, Clone, Copy)]
pub struct Resize {
    factor: f32,
}

impl Resize {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    /// Scales images to half their size, e.g. from retina to normal density.
    pub fn half() -> Self {
        Self::new(0.5)
    }
}

impl Transform for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let format = image::guess_format(&asset.data)?;
        let image = image::load_from_memory_with_format(&asset.data, format)?;

        let width = ((image.width() as f32 * self.factor).round() as u32).max(1);
        let height = ((image.height() as f32 * self.factor).round() as u32).max(1);
        let resized = image.resize_exact(width, height, ResizeFilter::Lanczos3);

        let mut buffer = Cursor::new(Vec::new());
        resized.write_to(&mut buffer, format)?;

        asset.data = buffer.into_inner();
        Ok(asset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    /// Encodes a solid rectangle as a quickly compressed PNG.
    pub(crate) fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)));
        ImageMin::new(0).optimize_png(&image).unwrap()
    }

    #[test]
    fn test_imagemin_shrinks_png() {
        let data = png(64, 64, [200, 10, 10, 255]);
        let before = data.len();

        let out = ImageMin::new(5).apply(Asset::new("a.png", "a.png", data)).unwrap();

        assert!(out.data.len() <= before);
        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_imagemin_passes_other_files() {
        let asset = Asset::new("a.svg", "a.svg", "<svg/>");
        let out = ImageMin::default().apply(asset).unwrap();
        assert_eq!(out.data, b"<svg/>");
    }

    #[test]
    fn test_resize_half() {
        let out = Resize::half()
            .apply(Asset::new("a.png", "a.png", png(32, 20, [0, 0, 255, 255])))
            .unwrap();

        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 10));
    }
}
