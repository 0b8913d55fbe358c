// src/services/image_processor.rs
use crate::errors::LumenError;
use crate::models::ReferenceImage;
use image::{GenericImageView, ImageFormat as ImgFormat};

pub struct ImageProcessor {
    max_dimension: u32,
}

impl ImageProcessor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    pub fn validate_image(&self, data: &[u8]) -> Result<(u32, u32), LumenError> {
        let img = image::load_from_memory(data)
            .map_err(|e| LumenError::ImageProcessing(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();

        if width > 4096 || height > 4096 {
            return Err(LumenError::ImageProcessing(
                "Image dimensions exceed 4096x4096".to_string(),
            ));
        }

        Ok((width, height))
    }

    pub fn detect_mime(&self, data: &[u8]) -> Result<&'static str, LumenError> {
        let format = image::guess_format(data)
            .map_err(|e| LumenError::ImageProcessing(format!("Unknown image format: {}", e)))?;
        match format {
            ImgFormat::Png => Ok("image/png"),
            ImgFormat::Jpeg => Ok("image/jpeg"),
            ImgFormat::WebP => Ok("image/webp"),
            ImgFormat::Gif => Ok("image/gif"),
            other => Err(LumenError::ImageProcessing(format!(
                "Unsupported image format: {:?}",
                other
            ))),
        }
    }

    /// Downscales to fit `max_size`, re-encoding as PNG. Images already small
    /// enough are returned untouched.
    pub fn resize_if_needed(&self, data: &[u8], max_size: u32) -> Result<Vec<u8>, LumenError> {
        let img = image::load_from_memory(data)
            .map_err(|e| LumenError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let (width, height) = img.dimensions();

        if width <= max_size && height <= max_size {
            return Ok(data.to_vec());
        }

        let ratio = (max_size as f32 / width.max(height) as f32).min(1.0);
        let new_width = (width as f32 * ratio) as u32;
        let new_height = (height as f32 * ratio) as u32;

        let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

        let mut output = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| {
                LumenError::ImageProcessing(format!("Failed to encode resized image: {}", e))
            })?;

        Ok(output)
    }

    /// Validates an upload and turns it into a reference image for generation.
    pub fn prepare_reference(&self, data: &[u8]) -> Result<ReferenceImage, LumenError> {
        self.validate_image(data)?;
        let mime_type = self.detect_mime(data)?;
        let processed = self.resize_if_needed(data, self.max_dimension)?;

        // Resizing re-encodes as PNG.
        let mime_type = if processed.as_slice() != data {
            "image/png"
        } else {
            mime_type
        };

        Ok(ReferenceImage {
            data: processed,
            mime_type: mime_type.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), ImgFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn rejects_non_image_bytes() {
        let processor = ImageProcessor::new(1024);
        assert!(processor.validate_image(b"not an image").is_err());
    }

    #[test]
    fn prepare_reference_downscales_large_uploads() {
        let processor = ImageProcessor::new(64);
        let reference = processor.prepare_reference(&png(256, 128)).unwrap();
        assert_eq!(reference.mime_type, "image/png");
        let img = image::load_from_memory(&reference.data).unwrap();
        assert_eq!(img.dimensions(), (64, 32));
    }

    #[test]
    fn small_uploads_pass_through() {
        let processor = ImageProcessor::new(1024);
        let data = png(16, 16);
        let reference = processor.prepare_reference(&data).unwrap();
        assert_eq!(reference.data, data);
    }
}
