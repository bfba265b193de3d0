use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Not an image: {path}")]
    NotAnImage { path: String },

    #[error("Malformed fingerprint: {value}")]
    Malformed { value: String },
}

/// Computes byte-exact content hashes of stamp images.
pub struct HashService;

impl HashService {
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 of the raw file bytes, lowercase hex.
    pub fn compute_content_hash(&self, file_path: &Path) -> Result<String, HashError> {
        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Like [`compute_content_hash`](Self::compute_content_hash), but refuses
    /// files whose leading bytes are not a known image format.
    pub fn compute_image_hash(&self, file_path: &Path) -> Result<String, HashError> {
        let format = image::ImageReader::open(file_path)?
            .with_guessed_format()?
            .format();
        if format.is_none() {
            return Err(HashError::NotAnImage {
                path: file_path.to_string_lossy().to_string(),
            });
        }
        self.compute_content_hash(file_path)
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path, shade: u8) {
        use image::{ImageBuffer, Rgb};
        let img = ImageBuffer::from_fn(16, 16, |_, _| Rgb([shade, shade, shade]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_compute_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"Hello, World!").unwrap();

        let hash_service = HashService::new();
        let hash = hash_service.compute_content_hash(&file_path).unwrap();
        let hash2 = hash_service.compute_content_hash(&file_path).unwrap();
        assert_eq!(hash, hash2);

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identical_files_same_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("a.png");
        let file2 = temp_dir.path().join("b.png");
        write_png(&file1, 40);
        fs::copy(&file1, &file2).unwrap();

        let hash_service = HashService::new();
        assert_eq!(
            hash_service.compute_image_hash(&file1).unwrap(),
            hash_service.compute_image_hash(&file2).unwrap()
        );
    }

    #[test]
    fn test_different_files_different_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("a.png");
        let file2 = temp_dir.path().join("b.png");
        write_png(&file1, 40);
        write_png(&file2, 200);

        let hash_service = HashService::new();
        assert_ne!(
            hash_service.compute_image_hash(&file1).unwrap(),
            hash_service.compute_image_hash(&file2).unwrap()
        );
    }

    #[test]
    fn test_image_hash_rejects_non_images() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("notes.jpg");
        fs::write(&file_path, b"definitely not a jpeg").unwrap();

        let result = HashService::new().compute_image_hash(&file_path);
        assert!(matches!(result, Err(HashError::NotAnImage { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = HashService::new().compute_content_hash(&temp_dir.path().join("gone.png"));
        assert!(matches!(result, Err(HashError::Io(_))));
    }
}
