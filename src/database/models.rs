use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The editable descriptive fields of a stamp. All free-form, blank by
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampFields {
    pub name: String,
    pub country: String,
    pub denomination: String,
    pub year: String,
    pub description: String,
    pub notes: String,
    pub catalog_number: String,
    pub mint_or_used: String,
    pub collection: String,
    pub lot_number: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampRecord {
    pub id: i64,
    pub image_path: String,
    #[serde(skip_serializing)]
    pub fingerprint: Option<String>,
    pub thumbnail_path: Option<String>,
    #[serde(flatten)]
    pub fields: StampFields,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewStamp {
    pub image_path: String,
    pub fingerprint: Option<String>,
    pub fields: StampFields,
}

impl NewStamp {
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            ..Default::default()
        }
    }
}

/// A partial update: `Some` fields are overwritten, `None` fields are left
/// alone. The fingerprint is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StampUpdate {
    pub name: Option<String>,
    pub country: Option<String>,
    pub denomination: Option<String>,
    pub year: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub catalog_number: Option<String>,
    pub mint_or_used: Option<String>,
    pub collection: Option<String>,
    pub lot_number: Option<String>,
    pub price: Option<String>,
}

impl StampUpdate {
    /// `(column, value)` pairs for every field present in the update.
    pub fn assignments(&self) -> Vec<(&'static str, &str)> {
        let columns: [(&'static str, &Option<String>); 11] = [
            ("name", &self.name),
            ("country", &self.country),
            ("denomination", &self.denomination),
            ("year", &self.year),
            ("description", &self.description),
            ("notes", &self.notes),
            ("catalog_number", &self.catalog_number),
            ("mint_or_used", &self.mint_or_used),
            ("collection", &self.collection),
            ("lot_number", &self.lot_number),
            ("price", &self.price),
        ];
        columns
            .into_iter()
            .filter_map(|(column, value)| value.as_deref().map(|v| (column, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub stamp_count: i64,
}
