pub mod enrichment;
pub mod export;
pub mod marketplace;
pub mod metadata;
pub mod scanner;

pub use export::{ExportFormat, Exporter};
pub use metadata::{MetadataExtractor, OllamaClient};
pub use scanner::ScannerService;
