use crate::database::models::StampRecord;
use crate::database::{Database, DatabaseError};
use chrono::Local;
use printpdf::{BuiltinFont, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use rust_xlsxwriter::{Format, Image, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Exported columns, in order. The fingerprint is never exported.
pub const COLUMNS: [&str; 16] = [
    "id",
    "image_path",
    "name",
    "country",
    "denomination",
    "year",
    "description",
    "notes",
    "catalog_number",
    "mint_or_used",
    "collection",
    "lot_number",
    "price",
    "tags",
    "created_at",
    "updated_at",
];

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;
const IMAGE_WIDTH: f32 = 60.0;
const LINE_HEIGHT: f32 = 7.0;
const FONT_SIZE: f32 = 12.0;
const WRAP_COLUMNS: usize = 80;
const THUMBNAIL_ROW_HEIGHT: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("PDF error: {0}")]
    Pdf(#[from] printpdf::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(format!("unknown export format '{}' (expected csv, xlsx or pdf)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub records: usize,
    /// Images that could not be embedded; their rows or pages are text-only.
    pub images_failed: usize,
}

pub struct Exporter {
    output_dir: PathBuf,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write the whole catalog to a new timestamped file in the output
    /// directory.
    pub fn export_all(&self, db: &Database, format: ExportFormat) -> Result<ExportReport, ExportError> {
        let records = db.stamps().list_all()?;
        fs::create_dir_all(&self.output_dir)?;
        let path = self.next_export_path(format);

        let images_failed = match format {
            ExportFormat::Csv => write_csv(&path, &records)?,
            ExportFormat::Xlsx => write_xlsx(&path, &records)?,
            ExportFormat::Pdf => write_pdf(&path, &records)?,
        };

        let path = fs::canonicalize(&path)?;
        log::info!(
            "Exported {} stamp(s) to {} ({} image(s) not embedded)",
            records.len(),
            path.display(),
            images_failed
        );
        Ok(ExportReport {
            path,
            records: records.len(),
            images_failed,
        })
    }

    fn next_export_path(&self, format: ExportFormat) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let candidate = self
            .output_dir
            .join(format!("export_{}.{}", stamp, format.extension()));
        if !candidate.exists() {
            return candidate;
        }
        (1..)
            .map(|n| {
                self.output_dir
                    .join(format!("export_{}_{}.{}", stamp, n, format.extension()))
            })
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

fn row_values(record: &StampRecord) -> [String; 16] {
    let f = &record.fields;
    [
        record.id.to_string(),
        record.image_path.clone(),
        f.name.clone(),
        f.country.clone(),
        f.denomination.clone(),
        f.year.clone(),
        f.description.clone(),
        f.notes.clone(),
        f.catalog_number.clone(),
        f.mint_or_used.clone(),
        f.collection.clone(),
        f.lot_number.clone(),
        f.price.clone(),
        record.tags.join(", "),
        record.created_at.to_rfc3339(),
        record.updated_at.to_rfc3339(),
    ]
}

fn write_csv(path: &Path, records: &[StampRecord]) -> Result<usize, ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.write_record(row_values(record))?;
    }
    writer.flush()?;
    Ok(0)
}

fn write_xlsx(path: &Path, records: &[StampRecord]) -> Result<usize, ExportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Stamps")?;

    let header = Format::new().set_bold();
    let thumbnail_col = COLUMNS.len() as u16;
    for (col, name) in COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }
    worksheet.write_string_with_format(0, thumbnail_col, "thumbnail", &header)?;
    worksheet.set_column_width(thumbnail_col, 12)?;

    let mut images_failed = 0;
    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_number(row, 0, record.id as f64)?;
        for (col, value) in row_values(record).iter().enumerate().skip(1) {
            worksheet.write_string(row, col as u16, value)?;
        }

        let Some(thumbnail) = &record.thumbnail_path else {
            continue;
        };
        match Image::new(thumbnail) {
            Ok(image) => {
                worksheet.set_row_height(row, THUMBNAIL_ROW_HEIGHT)?;
                worksheet.insert_image_fit_to_cell(row, thumbnail_col, &image, true)?;
            }
            Err(e) => {
                log::warn!("Could not embed thumbnail {}: {}", thumbnail, e);
                images_failed += 1;
            }
        }
    }

    workbook.save(path)?;
    Ok(images_failed)
}

fn write_pdf(path: &Path, records: &[StampRecord]) -> Result<usize, ExportError> {
    let (doc, first_page, first_layer) =
        PdfDocument::new("Stamp catalog", Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;

    if records.is_empty() {
        let layer = doc.get_page(first_page).get_layer(first_layer);
        layer.use_text("No stamps cataloged.", FONT_SIZE, Mm(MARGIN), Mm(PAGE_HEIGHT - 25.0), &font);
    }

    let mut images_failed = 0;
    for (i, record) in records.iter().enumerate() {
        let (page, layer) = if i == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1")
        };
        let layer = doc.get_page(page).get_layer(layer);

        let mut cursor = PAGE_HEIGHT - MARGIN;
        match embed_image(&layer, Path::new(&record.image_path), cursor) {
            Ok(height) => cursor -= height + 10.0,
            Err(e) => {
                log::warn!("Could not embed {} in PDF: {}", record.image_path, e);
                images_failed += 1;
                cursor -= 10.0;
            }
        }

        write_page_text(&layer, &font, record, cursor);
    }

    let mut writer = BufWriter::new(File::create(path)?);
    doc.save(&mut writer)?;
    Ok(images_failed)
}

/// Place the image `IMAGE_WIDTH` mm wide with its top edge at `top`.
/// Returns the placed height in mm.
fn embed_image(layer: &PdfLayerReference, image_path: &Path, top: f32) -> Result<f32, image::ImageError> {
    let rgb = image::open(image_path)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let raw = printpdf::image_crate::RgbImage::from_raw(width, height, rgb.into_raw())
        .map(printpdf::image_crate::DynamicImage::ImageRgb8)
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;

    let dpi = width as f32 * 25.4 / IMAGE_WIDTH;
    let height_mm = height as f32 * 25.4 / dpi;
    printpdf::Image::from_dynamic_image(&raw).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(MARGIN)),
            translate_y: Some(Mm(top - height_mm)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );
    Ok(height_mm)
}

fn write_page_text(layer: &PdfLayerReference, font: &IndirectFontRef, record: &StampRecord, top: f32) {
    let fields = &record.fields;
    let name = if fields.name.trim().is_empty() {
        "Unknown"
    } else {
        fields.name.as_str()
    };

    let mut lines = vec![
        format!("{} - {}", name, fields.country),
        format!("Denomination: {}", fields.denomination),
    ];
    lines.extend(wrap_text(&fields.description, WRAP_COLUMNS));

    let mut y = top;
    for line in lines {
        if y < MARGIN {
            break;
        }
        layer.use_text(line, FONT_SIZE, Mm(MARGIN), Mm(y), font);
        y -= LINE_HEIGHT;
    }
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewStamp, StampFields};
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn seed(db: &Database, dir: &Path, count: usize, with_images: bool) {
        for i in 0..count {
            let image_path = dir.join(format!("stamp_{}.png", i));
            if with_images {
                ImageBuffer::from_pixel(40, 30, Rgb([200u8, (i * 40) as u8, 30]))
                    .save(&image_path)
                    .unwrap();
            }
            db.stamps()
                .insert(&NewStamp {
                    image_path: image_path.to_string_lossy().to_string(),
                    fingerprint: Some(format!("sha256:{:064x}", i)),
                    fields: StampFields {
                        name: format!("Stamp {}", i),
                        country: "Canada".to_string(),
                        denomination: "3c".to_string(),
                        description: "Small Queen, perforated 12, light cancel".to_string(),
                        ..Default::default()
                    },
                })
                .unwrap();
        }
    }

    #[test]
    fn test_empty_catalog_csv_is_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let report = Exporter::new(temp_dir.path().join("backups"))
            .export_all(&db, ExportFormat::Csv)
            .unwrap();

        let content = fs::read_to_string(&report.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![COLUMNS.join(",")]);
        assert_eq!(report.records, 0);
    }

    #[test]
    fn test_csv_has_one_line_per_record_plus_header() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        seed(&db, temp_dir.path(), 3, false);
        db.tags().add_tag(1, "vintage").unwrap();

        let report = Exporter::new(temp_dir.path())
            .export_all(&db, ExportFormat::Csv)
            .unwrap();
        let content = fs::read_to_string(&report.path).unwrap();
        assert_eq!(content.lines().count(), 4);
        assert!(!content.contains("sha256:"));

        let mut reader = csv::Reader::from_path(&report.path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][2], "Stamp 0");
        assert_eq!(&rows[0][3], "Canada");
        assert_eq!(&rows[0][13], "vintage");
    }

    #[test]
    fn test_export_path_is_absolute_and_timestamped() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let exporter = Exporter::new(temp_dir.path().join("out"));

        let first = exporter.export_all(&db, ExportFormat::Csv).unwrap();
        let second = exporter.export_all(&db, ExportFormat::Csv).unwrap();

        assert!(first.path.is_absolute());
        assert_ne!(first.path, second.path);
        let name = first.path.file_name().unwrap().to_string_lossy().to_string();
        let re = regex::Regex::new(r"^export_\d{8}_\d{6}_\d{3}(_\d+)?\.csv$").unwrap();
        assert!(re.is_match(&name), "unexpected name {}", name);
    }

    #[test]
    fn test_xlsx_export_embeds_thumbnails() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        seed(&db, temp_dir.path(), 2, true);
        db.stamps()
            .set_thumbnail_path(1, &temp_dir.path().join("stamp_0.png").to_string_lossy())
            .unwrap();
        db.stamps()
            .set_thumbnail_path(2, &temp_dir.path().join("gone.jpg").to_string_lossy())
            .unwrap();

        let report = Exporter::new(temp_dir.path())
            .export_all(&db, ExportFormat::Xlsx)
            .unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.images_failed, 1);

        let bytes = fs::read(&report.path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_pdf_export_survives_missing_images() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        seed(&db, temp_dir.path(), 2, true);
        db.stamps()
            .insert(&NewStamp::new(temp_dir.path().join("missing.png").to_string_lossy()))
            .unwrap();

        let report = Exporter::new(temp_dir.path())
            .export_all(&db, ExportFormat::Pdf)
            .unwrap();
        assert_eq!(report.records, 3);
        assert_eq!(report.images_failed, 1);

        let bytes = fs::read(&report.path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_pdf_export_of_empty_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let report = Exporter::new(temp_dir.path())
            .export_all(&db, ExportFormat::Pdf)
            .unwrap();
        assert_eq!(report.records, 0);
        assert!(fs::read(&report.path).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" xlsx ".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!("pdf".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert!("docx".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Xlsx.to_string(), "xlsx");
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("", 10), Vec::<String>::new());
        assert_eq!(
            wrap_text("one two three four", 9),
            vec!["one two", "three", "four"]
        );
        assert_eq!(wrap_text("supercalifragilistic ok", 5), vec!["supercalifragilistic", "ok"]);
        assert_eq!(wrap_text("first\nsecond", 80), vec!["first", "second"]);
    }
}
