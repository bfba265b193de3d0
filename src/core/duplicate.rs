// Duplicate detection for incoming stamp images.
//
// Two policies exist: byte-exact (SHA-256 of the file) and perceptual (pHash
// Hamming distance). Matching is a linear scan over the stored fingerprints,
// which is fine for collections in the low thousands.

use super::hash::{HashError, HashService};
use super::perceptual::{self, PerceptualService};
use image_hasher::ImageHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Same bytes, same stamp.
    Exact,
    /// Same picture, within `threshold` bits.
    #[default]
    Perceptual,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Exact => write!(f, "exact"),
            DuplicatePolicy::Perceptual => write!(f, "perceptual"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(DuplicatePolicy::Exact),
            "perceptual" => Ok(DuplicatePolicy::Perceptual),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

/// Content fingerprint of a stamp image, stored once at ingestion.
///
/// The text form is `sha256:<hex>` or `phash:<base64>`.
#[derive(Debug, Clone)]
pub enum Fingerprint {
    Exact(String),
    Perceptual(ImageHash),
}

impl Fingerprint {
    pub fn policy(&self) -> DuplicatePolicy {
        match self {
            Fingerprint::Exact(_) => DuplicatePolicy::Exact,
            Fingerprint::Perceptual(_) => DuplicatePolicy::Perceptual,
        }
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Fingerprint::Exact(a), Fingerprint::Exact(b)) => a == b,
            (Fingerprint::Perceptual(a), Fingerprint::Perceptual(b)) => a.as_bytes() == b.as_bytes(),
            _ => false,
        }
    }
}

impl Eq for Fingerprint {}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Exact(hex) => write!(f, "sha256:{hex}"),
            Fingerprint::Perceptual(hash) => write!(f, "phash:{}", perceptual::encode_hash(hash)),
        }
    }
}

impl FromStr for Fingerprint {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || HashError::Malformed {
            value: s.to_string(),
        };
        match s.split_once(':') {
            Some(("sha256", hex))
                if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(Fingerprint::Exact(hex.to_ascii_lowercase()))
            }
            Some(("phash", encoded)) => {
                perceptual::decode_hash(encoded).map(Fingerprint::Perceptual)
            }
            _ => Err(malformed()),
        }
    }
}

pub struct DuplicateDetector {
    pub policy: DuplicatePolicy,
    pub threshold: u32,
    hash_service: HashService,
    perceptual_service: PerceptualService,
}

impl DuplicateDetector {
    pub fn new(policy: DuplicatePolicy, threshold: u32) -> Self {
        Self {
            policy,
            threshold,
            hash_service: HashService::new(),
            perceptual_service: PerceptualService::new(),
        }
    }

    /// Fingerprint `image_path` under the active policy, or `None` when the
    /// file is missing or not a readable image.
    pub fn fingerprint(&self, image_path: &Path) -> Option<Fingerprint> {
        let result = match self.policy {
            DuplicatePolicy::Exact => self
                .hash_service
                .compute_image_hash(image_path)
                .map(Fingerprint::Exact),
            DuplicatePolicy::Perceptual => self
                .perceptual_service
                .compute_perceptual_hash(image_path)
                .map(Fingerprint::Perceptual),
        };

        match result {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                log::warn!("Could not fingerprint {}: {}", image_path.display(), e);
                None
            }
        }
    }

    /// True if the image at `candidate_path` matches any of `existing`.
    /// An unreadable candidate is never a duplicate.
    pub fn is_duplicate(&self, candidate_path: &Path, existing: &[Fingerprint]) -> bool {
        match self.fingerprint(candidate_path) {
            Some(candidate) => self.is_duplicate_fingerprint(&candidate, existing),
            None => false,
        }
    }

    pub fn is_duplicate_fingerprint(&self, candidate: &Fingerprint, existing: &[Fingerprint]) -> bool {
        existing.iter().any(|stored| self.matches(candidate, stored))
    }

    /// Whether two fingerprints denote the same stamp. Fingerprints of
    /// different kinds never match.
    pub fn matches(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        match (a, b) {
            (Fingerprint::Exact(x), Fingerprint::Exact(y)) => x == y,
            (Fingerprint::Perceptual(x), Fingerprint::Perceptual(y)) => {
                self.perceptual_service.distance(x, y) < self.threshold
            }
            _ => false,
        }
    }

    /// Group items whose fingerprints match each other, keeping input order.
    /// Each item joins the first group it matches; quadratic in the input.
    pub fn group_duplicates<T: Clone>(&self, items: &[(T, Fingerprint)]) -> Vec<Vec<T>> {
        let mut assigned = vec![false; items.len()];
        let mut groups = Vec::new();

        for (i, (item, fingerprint)) in items.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            let mut group = vec![item.clone()];
            for (j, (other, other_fp)) in items.iter().enumerate().skip(i + 1) {
                if !assigned[j] && self.matches(fingerprint, other_fp) {
                    assigned[j] = true;
                    group.push(other.clone());
                }
            }
            if group.len() > 1 {
                assigned[i] = true;
                groups.push(group);
            }
        }

        groups
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default(), DEFAULT_THRESHOLD)
    }
}
