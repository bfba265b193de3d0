pub mod country;
pub mod duplicate;
pub mod hash;
pub mod perceptual;
pub mod thumbnail;
pub mod title;

pub use duplicate::{DuplicateDetector, DuplicatePolicy, Fingerprint};
pub use hash::HashService;
pub use perceptual::PerceptualService;
pub use thumbnail::ThumbnailService;
