//! Candidate metadata for a freshly scanned stamp image.
//!
//! A local vision model is asked to describe the image. Whatever goes wrong
//! with that call (no server, a timeout, a bad reply) the extractor falls
//! back to values derived from the file name, so cataloging never blocks
//! on the model.

use crate::core::country::{CountryExtractor, WordListCountries};
use crate::core::title::find_year;
use crate::database::models::StampFields;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const PROMPT: &str = "Identify the stamp's country and denomination";
pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("request to vision service failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vision service returned HTTP {0}")]
    Status(u16),

    #[error("vision service returned no usable text")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can look at an image and answer a prompt about it.
pub trait VisionBackend: Send + Sync {
    fn describe(&self, image_path: &Path, prompt: &str) -> Result<String, MetadataError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for an Ollama server's `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, MetadataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stampd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl VisionBackend for OllamaClient {
    fn describe(&self, image_path: &Path, prompt: &str) -> Result<String, MetadataError> {
        let image_data = fs::read(image_path)?;
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            images: vec![BASE64_STANDARD.encode(&image_data)],
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status(status.as_u16()));
        }

        let body: GenerateResponse = response.json()?;
        let text = body.response.trim();
        if text.is_empty() {
            return Err(MetadataError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampMetadata {
    pub name: String,
    pub country: String,
    pub denomination: String,
    pub year: String,
    pub description: String,
}

impl StampMetadata {
    fn unknown() -> Self {
        Self {
            country: UNKNOWN_COUNTRY.to_string(),
            ..Default::default()
        }
    }

    fn from_file_name(image_path: &Path) -> Self {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            description: format!("Stamp from {}", stem),
            name: stem,
            country: UNKNOWN_COUNTRY.to_string(),
            ..Default::default()
        }
    }

    pub fn into_fields(self) -> StampFields {
        StampFields {
            name: self.name,
            country: self.country,
            denomination: self.denomination,
            year: self.year,
            description: self.description,
            ..Default::default()
        }
    }
}

pub struct MetadataExtractor {
    backend: Box<dyn VisionBackend>,
    countries: Box<dyn CountryExtractor>,
}

impl MetadataExtractor {
    pub fn new(backend: Box<dyn VisionBackend>) -> Self {
        Self {
            backend,
            countries: Box::new(WordListCountries::default()),
        }
    }

    pub fn with_countries(mut self, countries: Box<dyn CountryExtractor>) -> Self {
        self.countries = countries;
        self
    }

    /// Never fails. A missing file yields blank fields with an unknown
    /// country; a backend failure yields the file-name fallback.
    pub fn extract(&self, image_path: &Path) -> StampMetadata {
        if fs::File::open(image_path).is_err() || !image_path.is_file() {
            log::warn!("Cannot read {} for metadata", image_path.display());
            return StampMetadata::unknown();
        }

        match self.backend.describe(image_path, PROMPT) {
            Ok(response) => self.from_response(response),
            Err(e) => {
                log::warn!(
                    "Vision backend failed for {}, using file name: {}",
                    image_path.display(),
                    e
                );
                StampMetadata::from_file_name(image_path)
            }
        }
    }

    fn from_response(&self, response: String) -> StampMetadata {
        let year = find_year(&response).unwrap_or_default().to_string();
        let country = match self.countries.extract_country(&response) {
            c if c.is_empty() => UNKNOWN_COUNTRY.to_string(),
            c => c,
        };
        StampMetadata {
            name: String::new(),
            country,
            denomination: String::new(),
            year,
            description: response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Canned(Option<&'static str>);

    impl VisionBackend for Canned {
        fn describe(&self, _image_path: &Path, _prompt: &str) -> Result<String, MetadataError> {
            self.0
                .map(str::to_string)
                .ok_or(MetadataError::EmptyResponse)
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl VisionBackend for Counting {
        fn describe(&self, _image_path: &Path, _prompt: &str) -> Result<String, MetadataError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("something".to_string())
        }
    }

    struct Helvetia;

    impl CountryExtractor for Helvetia {
        fn extract_country(&self, text: &str) -> String {
            if text.contains("HELVETIA") {
                "Switzerland".to_string()
            } else {
                String::new()
            }
        }
    }

    fn image_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"pretend image bytes").unwrap();
        path
    }

    #[test]
    fn test_successful_response() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "scan_01.jpg");
        let extractor = MetadataExtractor::new(Box::new(Canned(Some(
            "A red 10 pfennig stamp from Germany, issued 1934.",
        ))));

        let metadata = extractor.extract(&path);
        assert_eq!(metadata.country, "Germany");
        assert_eq!(metadata.year, "1934");
        assert_eq!(metadata.description, "A red 10 pfennig stamp from Germany, issued 1934.");
        assert_eq!(metadata.name, "");
    }

    #[test]
    fn test_response_without_known_country() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "scan_02.jpg");
        let extractor = MetadataExtractor::new(Box::new(Canned(Some("A bird on a branch"))));

        let metadata = extractor.extract(&path);
        assert_eq!(metadata.country, UNKNOWN_COUNTRY);
        assert_eq!(metadata.year, "");
    }

    #[test]
    fn test_backend_failure_uses_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "penny_black.png");
        let extractor = MetadataExtractor::new(Box::new(Canned(None)));

        let metadata = extractor.extract(&path);
        assert_eq!(metadata.name, "penny_black");
        assert_eq!(metadata.country, UNKNOWN_COUNTRY);
        assert_eq!(metadata.denomination, "");
        assert_eq!(metadata.description, "Stamp from penny_black");

        // Deterministic across calls.
        assert_eq!(extractor.extract(&path), metadata);
    }

    #[test]
    fn test_missing_file_skips_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = MetadataExtractor::new(Box::new(Counting(calls.clone())));

        let metadata = extractor.extract(Path::new("/definitely/not/here.png"));
        assert_eq!(metadata, StampMetadata::unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_directory_is_not_an_image() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = MetadataExtractor::new(Box::new(Counting(calls.clone())));

        assert_eq!(extractor.extract(temp_dir.path()), StampMetadata::unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_country_strategy_is_replaceable() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "swiss.jpg");
        let extractor = MetadataExtractor::new(Box::new(Canned(Some("HELVETIA 20 Rp, USA overprint"))))
            .with_countries(Box::new(Helvetia));

        assert_eq!(extractor.extract(&path).country, "Switzerland");
    }

    #[test]
    fn test_into_fields() {
        let fields = StampMetadata {
            name: "n".to_string(),
            country: "Japan".to_string(),
            denomination: "10 sen".to_string(),
            year: "1960".to_string(),
            description: "d".to_string(),
        }
        .into_fields();
        assert_eq!(fields.country, "Japan");
        assert_eq!(fields.denomination, "10 sen");
        assert_eq!(fields.notes, "");
    }

    /// Serves exactly one HTTP request with `status` and `body`, handing the
    /// received request body back through the join handle.
    fn serve_once(status: &'static str, body: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            )
            .unwrap();
            stream.flush().unwrap();
            String::from_utf8(request_body).unwrap()
        });
        (url, handle)
    }

    #[test]
    fn test_ollama_client_posts_generate_request() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "stamp.jpg");
        let (url, handle) = serve_once("200 OK", r#"{"response":"  Canada 1898 map stamp  "}"#);

        let client = OllamaClient::new(&url, "llava", Duration::from_secs(10)).unwrap();
        let text = client.describe(&path, PROMPT).unwrap();
        assert_eq!(text, "Canada 1898 map stamp");

        let sent: serde_json::Value = serde_json::from_str(&handle.join().unwrap()).unwrap();
        assert_eq!(sent["model"], "llava");
        assert_eq!(sent["prompt"], PROMPT);
        assert_eq!(sent["stream"], false);
        assert_eq!(
            sent["images"][0],
            BASE64_STANDARD.encode(b"pretend image bytes")
        );
    }

    #[test]
    fn test_ollama_client_non_success_status() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "stamp.jpg");
        let (url, handle) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#);

        let client = OllamaClient::new(&url, "llava", Duration::from_secs(10)).unwrap();
        let result = client.describe(&path, PROMPT);
        assert!(matches!(result, Err(MetadataError::Status(500))));
        handle.join().unwrap();
    }

    #[test]
    fn test_ollama_client_empty_response() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "stamp.jpg");
        let (url, handle) = serve_once("200 OK", r#"{"response":"   "}"#);

        let client = OllamaClient::new(&url, "llava", Duration::from_secs(10)).unwrap();
        assert!(matches!(
            client.describe(&path, PROMPT),
            Err(MetadataError::EmptyResponse)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_ollama_client_missing_file() {
        let client =
            OllamaClient::new("http://127.0.0.1:9", "llava", Duration::from_secs(1)).unwrap();
        let result = client.describe(Path::new("/no/such/stamp.png"), PROMPT);
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }

    #[test]
    fn test_unreachable_server_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = image_file(&temp_dir, "offline.jpg");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = OllamaClient::new(&url, "llava", Duration::from_secs(2)).unwrap();
        let extractor = MetadataExtractor::new(Box::new(client));
        let metadata = extractor.extract(&path);
        assert_eq!(metadata.name, "offline");
        assert_eq!(metadata.description, "Stamp from offline");
    }
}
