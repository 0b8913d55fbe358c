// src/services/refinement_service.rs
use crate::catalog::RefinerPreset;
use crate::errors::LumenError;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat as ImgFormat};

pub const REFINED_MIME_TYPE: &str = "image/png";

/// Post-processing collaborator. Output is always PNG.
#[async_trait]
pub trait RefinementService: Send + Sync {
    async fn refine(&self, data: &[u8], preset: RefinerPreset) -> Result<Vec<u8>, LumenError>;
}

/// Local refinement backed by the `image` crate.
pub struct ImageRefiner;

impl ImageRefiner {
    pub fn new() -> Self {
        Self
    }

    fn apply(img: DynamicImage, preset: RefinerPreset) -> DynamicImage {
        match preset {
            RefinerPreset::Photorealistic => img.unsharpen(1.0, 2).adjust_contrast(4.0),
            RefinerPreset::Cinematic => img.adjust_contrast(14.0).brighten(-6).unsharpen(0.8, 3),
            RefinerPreset::Artistic => img.adjust_contrast(8.0).huerotate(4),
            RefinerPreset::Vivid => img.adjust_contrast(18.0).brighten(4).unsharpen(1.2, 2),
            RefinerPreset::Soft => img.blur(0.6).brighten(6),
        }
    }

    pub fn refine_blocking(data: &[u8], preset: RefinerPreset) -> Result<Vec<u8>, LumenError> {
        let img = image::load_from_memory(data)
            .map_err(|e| LumenError::Refinement(format!("Failed to load image: {}", e)))?;

        let refined = Self::apply(img, preset);

        let mut output = Vec::new();
        refined
            .write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| LumenError::Refinement(format!("Failed to encode refined image: {}", e)))?;

        Ok(output)
    }
}

#[async_trait]
impl RefinementService for ImageRefiner {
    async fn refine(&self, data: &[u8], preset: RefinerPreset) -> Result<Vec<u8>, LumenError> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || Self::refine_blocking(&data, preset))
            .await
            .map_err(|e| LumenError::Refinement(format!("Refinement task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn jpeg() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([200, 120, 40])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), ImgFormat::Jpeg)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn every_preset_produces_png() {
        let refiner = ImageRefiner::new();
        let input = jpeg();
        for preset in RefinerPreset::ALL {
            let out = refiner.refine(&input, preset).await.unwrap();
            assert_eq!(image::guess_format(&out).unwrap(), ImgFormat::Png);
        }
    }

    #[tokio::test]
    async fn garbage_input_is_a_refinement_error() {
        let err = ImageRefiner::new()
            .refine(b"nope", RefinerPreset::Soft)
            .await
            .unwrap_err();
        assert!(matches!(err, LumenError::Refinement(_)));
    }
}
