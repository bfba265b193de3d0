use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Pixels at or above this luma count as background paper when cropping.
const BACKGROUND_LUMA: u8 = 250;
const CONTRAST_BOOST: f32 = 30.0;

pub struct ThumbnailService {
    thumbnail_size: u32,
    quality: u8,
}

impl ThumbnailService {
    pub fn new() -> Self {
        Self {
            thumbnail_size: 256,
            quality: 85,
        }
    }

    /// Write a JPEG thumbnail of `original_path` to `thumbnail_path`. The
    /// original file is never modified.
    pub fn generate_thumbnail(
        &self,
        original_path: &Path,
        thumbnail_path: &Path,
    ) -> Result<(), ThumbnailError> {
        if !original_path.is_file() {
            return Err(ThumbnailError::InvalidPath {
                path: original_path.to_string_lossy().to_string(),
            });
        }

        if let Some(parent) = thumbnail_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let img = image::open(original_path)?;
        let img = enhance_and_crop(img);
        let thumbnail = self.resize_image(img, self.thumbnail_size);
        self.save_thumbnail(&thumbnail, thumbnail_path)
    }

    /// Where the thumbnail for stamp `stamp_id` lives.
    pub fn get_thumbnail_path(&self, thumbnails_dir: &Path, stamp_id: i64) -> PathBuf {
        thumbnails_dir.join(format!("{}.jpg", stamp_id))
    }

    fn resize_image(&self, img: DynamicImage, target_size: u32) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width <= target_size && height <= target_size {
            return img;
        }

        let (new_width, new_height) = if width > height {
            let ratio = target_size as f32 / width as f32;
            (target_size, ((height as f32 * ratio) as u32).max(1))
        } else {
            let ratio = target_size as f32 / height as f32;
            (((width as f32 * ratio) as u32).max(1), target_size)
        };

        img.resize(new_width, new_height, FilterType::Lanczos3)
    }

    fn save_thumbnail(&self, img: &DynamicImage, path: &Path) -> Result<(), ThumbnailError> {
        let rgb_img = img.to_rgb8();
        let mut output = fs::File::create(path)?;
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, self.quality);
        rgb_img.write_with_encoder(encoder)?;
        Ok(())
    }
}

impl Default for ThumbnailService {
    fn default() -> Self {
        Self::new()
    }
}

/// Boost contrast, then crop away the white margin around the stamp.
/// An all-white image is returned uncropped.
pub fn enhance_and_crop(img: DynamicImage) -> DynamicImage {
    let img = img.adjust_contrast(CONTRAST_BOOST);
    let gray = img.to_luma8();

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] >= BACKGROUND_LUMA {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    match bounds {
        Some((x0, y0, x1, y1)) => img.crop_imm(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
        None => img,
    }
}
