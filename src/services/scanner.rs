use crate::core::duplicate::{DuplicateDetector, Fingerprint};
use crate::core::thumbnail::ThumbnailService;
use crate::database::models::NewStamp;
use crate::database::{Database, DatabaseError};
use crate::services::metadata::MetadataExtractor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("directory {path} does not exist")]
    MissingDirectory { path: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub discovered: usize,
    pub added: usize,
    pub skipped_existing: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found, {} added, {} already cataloged, {} duplicates skipped, {} failed",
            self.discovered, self.added, self.skipped_existing, self.skipped_duplicate, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    Fingerprinting,
    Extracting,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub stage: ScanStage,
    pub done: usize,
    pub total: usize,
}

pub type ProgressCallback<'a> = Box<dyn Fn(ScanProgress) + Sync + 'a>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub recursive: bool,
}

/// Turns image files into catalog records: duplicate gate, metadata,
/// insert, thumbnail.
pub struct ScannerService<'a> {
    db: &'a Database,
    detector: &'a DuplicateDetector,
    extractor: &'a MetadataExtractor,
    images_dir: PathBuf,
    thumbnails: Option<(ThumbnailService, PathBuf)>,
    progress: Option<ProgressCallback<'a>>,
}

impl<'a> ScannerService<'a> {
    pub fn new(
        db: &'a Database,
        detector: &'a DuplicateDetector,
        extractor: &'a MetadataExtractor,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db,
            detector,
            extractor,
            images_dir: images_dir.into(),
            thumbnails: None,
            progress: None,
        }
    }

    pub fn with_thumbnails(mut self, thumbnails_dir: impl Into<PathBuf>) -> Self {
        self.thumbnails = Some((ThumbnailService::new(), thumbnails_dir.into()));
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback<'a>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Catalog every image in `dir` (the images directory by default) that
    /// is not cataloged yet.
    pub fn scan_folder(
        &self,
        dir: Option<&Path>,
        options: ScanOptions,
    ) -> Result<ScanSummary, ScanError> {
        let dir = dir.unwrap_or(&self.images_dir);
        let files: Vec<PathBuf> = discover_images(dir, options.recursive)?
            .into_iter()
            .map(|file| fs::canonicalize(&file).unwrap_or(file))
            .collect();
        log::info!("Found {} image(s) in {}", files.len(), dir.display());

        let known = self.db.stamps().all_image_paths()?;
        let mut summary = ScanSummary {
            discovered: files.len(),
            ..Default::default()
        };

        let mut fresh = Vec::new();
        for file in files {
            if known.contains(&*file.to_string_lossy()) {
                summary.skipped_existing += 1;
            } else {
                fresh.push(file);
            }
        }

        self.ingest(fresh, &mut summary, |path| Ok(path.to_path_buf()))?;
        Ok(summary)
    }

    /// Copy `files` into the images directory and catalog them. Files that
    /// fail the duplicate gate are never copied.
    pub fn import_files(&self, files: &[PathBuf]) -> Result<ScanSummary, ScanError> {
        fs::create_dir_all(&self.images_dir)?;
        let images_dir = fs::canonicalize(&self.images_dir)?;

        let mut summary = ScanSummary {
            discovered: files.len(),
            ..Default::default()
        };

        let mut candidates = Vec::new();
        for file in files {
            if file.is_file() && has_image_extension(file) {
                candidates.push(file.clone());
            } else {
                log::warn!("Skipping {}: not a png or jpeg file", file.display());
                summary.failed += 1;
            }
        }

        self.ingest(candidates, &mut summary, move |source| {
            let name = source
                .file_name()
                .map(|n| sanitize_file_name(&n.to_string_lossy()))
                .unwrap_or_else(|| "image".to_string());
            let target = unique_path(&images_dir, &name);
            fs::copy(source, &target)?;
            Ok(target)
        })?;
        Ok(summary)
    }

    fn ingest<F>(
        &self,
        paths: Vec<PathBuf>,
        summary: &mut ScanSummary,
        place: F,
    ) -> Result<(), ScanError>
    where
        F: Fn(&Path) -> io::Result<PathBuf>,
    {
        if paths.is_empty() {
            return Ok(());
        }

        let detector = self.detector;
        let extractor = self.extractor;
        let progress = &self.progress;
        let total = paths.len();

        let done = AtomicUsize::new(0);
        let fingerprinted: Vec<(PathBuf, Option<Fingerprint>)> = paths
            .into_par_iter()
            .map(|path| {
                let fingerprint = detector.fingerprint(&path);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                report(progress, ScanStage::Fingerprinting, n, total);
                (path, fingerprint)
            })
            .collect();

        let mut known = self.stored_fingerprints()?;
        let mut accepted = Vec::new();
        for (path, fingerprint) in fingerprinted {
            let Some(fingerprint) = fingerprint else {
                summary.failed += 1;
                continue;
            };
            if detector.is_duplicate_fingerprint(&fingerprint, &known) {
                log::info!("Skipping duplicate image {}", path.display());
                summary.skipped_duplicate += 1;
                continue;
            }
            match place(&path) {
                Ok(placed) => {
                    known.push(fingerprint.clone());
                    let copied = placed != path;
                    accepted.push((placed, copied, fingerprint));
                }
                Err(e) => {
                    log::warn!("Could not copy {} into the catalog: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }

        let total = accepted.len();
        let done = AtomicUsize::new(0);
        let extracted: Vec<_> = accepted
            .into_par_iter()
            .map(|(path, copied, fingerprint)| {
                let metadata = extractor.extract(&path);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                report(progress, ScanStage::Extracting, n, total);
                (path, copied, fingerprint, metadata)
            })
            .collect();

        let stamps = self.db.stamps();
        for (n, (path, copied, fingerprint, metadata)) in extracted.into_iter().enumerate() {
            let new_stamp = NewStamp {
                image_path: path.to_string_lossy().to_string(),
                fingerprint: Some(fingerprint.to_string()),
                fields: metadata.into_fields(),
            };
            match stamps.insert(&new_stamp) {
                Ok(id) => {
                    summary.added += 1;
                    self.make_thumbnail(id, &path);
                }
                Err(DatabaseError::Conflict { image_path }) => {
                    log::info!("{} is already cataloged", image_path);
                    summary.skipped_existing += 1;
                    if copied {
                        remove_copy(&path);
                    }
                }
                Err(e) => {
                    log::error!("Could not catalog {}: {}", path.display(), e);
                    summary.failed += 1;
                    if copied {
                        remove_copy(&path);
                    }
                }
            }
            report(progress, ScanStage::Saving, n + 1, total);
        }

        Ok(())
    }

    fn stored_fingerprints(&self) -> Result<Vec<Fingerprint>, ScanError> {
        let stored = self.db.stamps().fingerprints()?;
        let mut fingerprints = Vec::with_capacity(stored.len());
        for (id, text) in stored {
            match text.parse::<Fingerprint>() {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err(e) => log::warn!("Ignoring stored fingerprint of stamp {}: {}", id, e),
            }
        }
        Ok(fingerprints)
    }

    fn make_thumbnail(&self, id: i64, image_path: &Path) {
        let Some((service, dir)) = &self.thumbnails else {
            return;
        };
        let thumbnail_path = service.get_thumbnail_path(dir, id);
        let result = service
            .generate_thumbnail(image_path, &thumbnail_path)
            .map_err(|e| e.to_string())
            .and_then(|_| {
                self.db
                    .stamps()
                    .set_thumbnail_path(id, &thumbnail_path.to_string_lossy())
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            log::warn!("No thumbnail for {}: {}", image_path.display(), e);
        }
    }
}

fn remove_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Could not remove uncataloged copy {}: {}", path.display(), e);
    }
}

fn report(progress: &Option<ProgressCallback<'_>>, stage: ScanStage, done: usize, total: usize) {
    if let Some(callback) = progress {
        callback(ScanProgress { stage, done, total });
    }
}

/// Image files in `dir`, sorted by path. Only the top level unless
/// `recursive`.
pub fn discover_images(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::MissingDirectory {
            path: dir.to_string_lossy().to_string(),
        });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Walk error under {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    images.sort();
    Ok(images)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Reduce an uploaded file name to ASCII letters, digits, `.`, `-` and `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `dir/name`, or `dir/stem_N.ext` for the first N that is free.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let extension = as_path.extension().map(|e| e.to_string_lossy().to_string());

    (1..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
