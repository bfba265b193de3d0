use super::hash::HashError;
use image::ImageReader;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use std::path::Path;

/// Perceptual hashing of stamp photos.
///
/// Uses the DCT-preprocessed mean hash (the classic pHash scheme) at 8x8,
/// so every hash is 64 bits and re-compressed or lightly cropped copies of
/// the same photo land within a few bits of each other.
pub struct PerceptualService {
    hasher: Hasher,
}

impl PerceptualService {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_size(8, 8)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher();
        Self { hasher }
    }

    pub fn compute_perceptual_hash(&self, image_path: &Path) -> Result<ImageHash, HashError> {
        let img = ImageReader::open(image_path)?
            .with_guessed_format()?
            .decode()?;
        Ok(self.hasher.hash_image(&img))
    }

    /// Hamming distance between two hashes, in bits.
    pub fn distance(&self, a: &ImageHash, b: &ImageHash) -> u32 {
        a.dist(b)
    }
}

impl Default for PerceptualService {
    fn default() -> Self {
        Self::new()
    }
}

pub fn encode_hash(hash: &ImageHash) -> String {
    hash.to_base64()
}

pub fn decode_hash(encoded: &str) -> Result<ImageHash, HashError> {
    ImageHash::from_base64(encoded).map_err(|_| HashError::Malformed {
        value: encoded.to_string(),
    })
}
