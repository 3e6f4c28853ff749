use std::fmt;
use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbaImage;
use tracing::debug;

use crate::capture::frame::RgbaView;
use crate::error::GrabError;

/// The intro/outro still a session looks for. Immutable and cheap to clone.
#[derive(Clone)]
pub struct ReferenceImage {
    pixels: Arc<RgbaImage>,
}

impl ReferenceImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Decode an encoded still (JPEG, PNG) into RGBA.
    pub fn decode(encoded: &[u8]) -> Result<Self, GrabError> {
        let pixels = image::load_from_memory(encoded)?.to_rgba8();
        debug!(
            width = pixels.width(),
            height = pixels.height(),
            "decoded reference image"
        );
        Ok(Self::from_rgba(pixels))
    }

    /// Decode and resize to the analysis resolution.
    pub fn decode_fitted(encoded: &[u8], width: u32, height: u32) -> Result<Self, GrabError> {
        let decoded = Self::decode(encoded)?;
        if decoded.dimensions() == (width, height) {
            return Ok(decoded);
        }

        let resized = image::imageops::resize(&*decoded.pixels, width, height, FilterType::Triangle);
        Ok(Self::from_rgba(resized))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn view(&self) -> RgbaView<'_> {
        // RgbaImage always holds exactly width * height * 4 bytes
        RgbaView::from_parts(
            self.width(),
            self.height(),
            self.width() as usize * 4,
            self.pixels.as_raw(),
        )
    }
}

impl fmt::Debug for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba};
    use std::io::Cursor;

    fn encode_png(image: RgbaImage) -> Vec<u8> {
        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();
        encoded
    }

    #[test]
    fn decodes_png_to_rgba() {
        let encoded = encode_png(RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255])));
        let reference = ReferenceImage::decode(&encoded).unwrap();

        assert_eq!(reference.dimensions(), (6, 4));
        assert_eq!(reference.view().row(3)[..4], [0, 0, 255, 255]);
    }

    #[test]
    fn fitted_decode_resizes() {
        let encoded = encode_png(RgbaImage::from_pixel(32, 16, Rgba([9, 9, 9, 255])));
        let reference = ReferenceImage::decode_fitted(&encoded, 12, 8).unwrap();
        assert_eq!(reference.dimensions(), (12, 8));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = ReferenceImage::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, GrabError::ReferenceDecode(_)));
    }

    #[test]
    fn clones_share_pixels() {
        let reference = ReferenceImage::from_rgba(RgbaImage::new(2, 2));
        let clone = reference.clone();
        assert!(std::ptr::eq(reference.image(), clone.image()));
    }
}
