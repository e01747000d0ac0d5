use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageError, ImageFormat};

/// A downscaled raster rendition of an image item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    /// PNG encoded pixels
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Small and large renditions of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewPair {
    pub thumbnail: Preview,
    pub preview: Preview,
}

/// Renders bounded-size previews of image payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailGenerator {
    thumbnail_edge: u32,
    preview_edge: u32,
}

impl ThumbnailGenerator {
    pub fn new(thumbnail_edge: u32, preview_edge: u32) -> Self {
        Self {
            thumbnail_edge: thumbnail_edge.max(1),
            preview_edge: preview_edge.max(1),
        }
    }

    /// Decode once and render both sizes. CPU bound, call off the runtime.
    pub fn render(&self, image_bytes: &[u8]) -> Result<PreviewPair, ImageError> {
        let decoded = image::load_from_memory(image_bytes)?;
        Ok(PreviewPair {
            thumbnail: scale(&decoded, self.thumbnail_edge)?,
            preview: scale(&decoded, self.preview_edge)?,
        })
    }
}

fn scale(decoded: &DynamicImage, max_edge: u32) -> Result<Preview, ImageError> {
    let (width, height) = decoded.dimensions();
    let (target_width, target_height) = calculate_target_size(width, height, max_edge);

    let resized = if (target_width, target_height) == (width, height) {
        decoded.clone()
    } else {
        DynamicImage::ImageRgba8(image::imageops::resize(
            decoded,
            target_width,
            target_height,
            FilterType::Triangle,
        ))
    };

    let mut bytes = Vec::new();
    resized.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(Preview {
        bytes,
        width: target_width,
        height: target_height,
    })
}

fn calculate_target_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    if width >= height {
        let scaled_height = ((height as f64) * (max_edge as f64) / (width as f64)).round() as u32;
        (max_edge, scaled_height.max(1))
    } else {
        let scaled_width = ((width as f64) * (max_edge as f64) / (height as f64)).round() as u32;
        (scaled_width.max(1), max_edge)
    }
}

#[cfg(test)]
pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::new(width, height);
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_resizes_to_both_edges() {
        let generator = ThumbnailGenerator::new(64, 128);
        let pair = generator.render(&png(256, 128)).unwrap();

        assert_eq!((pair.thumbnail.width, pair.thumbnail.height), (64, 32));
        assert_eq!((pair.preview.width, pair.preview.height), (128, 64));

        let decoded = image::load_from_memory(&pair.thumbnail.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn test_small_images_keep_their_size() {
        let pair = ThumbnailGenerator::new(64, 512).render(&png(10, 40)).unwrap();
        assert_eq!((pair.thumbnail.width, pair.thumbnail.height), (10, 40));
        assert_eq!((pair.preview.width, pair.preview.height), (10, 40));
    }

    #[test]
    fn test_target_size() {
        assert_eq!(calculate_target_size(100, 50, 200), (100, 50));
        assert_eq!(calculate_target_size(50, 400, 100), (13, 100));
        assert_eq!(calculate_target_size(1000, 1, 10), (10, 1));
    }

    #[test]
    fn test_invalid_bytes_fail() {
        assert!(ThumbnailGenerator::new(64, 512).render(b"not an image").is_err());
    }
}
