use crate::core::title::parse_title;
use crate::database::models::{StampRecord, StampUpdate};
use crate::database::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub record: StampRecord,
    /// Names of the fields that were blank and got filled.
    pub filled: Vec<&'static str>,
}

/// Fill a stamp's blank year, country and denomination from a marketplace
/// listing title. Fields that already hold a value are left as they are.
pub fn enrich_from_title(db: &Database, id: i64, title: &str) -> Result<Enrichment, DatabaseError> {
    let stamps = db.stamps();
    let record = stamps.get(id)?;
    let parsed = parse_title(title);

    let mut update = StampUpdate::default();
    let mut filled = Vec::new();

    let candidates = [
        ("year", &record.fields.year, parsed.year, &mut update.year),
        ("country", &record.fields.country, parsed.country, &mut update.country),
        (
            "denomination",
            &record.fields.denomination,
            parsed.denomination,
            &mut update.denomination,
        ),
    ];
    for (field, current, value, slot) in candidates {
        if current.trim().is_empty() && !value.is_empty() {
            *slot = Some(value);
            filled.push(field);
        }
    }

    if filled.is_empty() {
        return Ok(Enrichment { record, filled });
    }

    log::info!("Filled {} of stamp {} from title", filled.join(", "), id);
    let record = stamps.update(id, &update)?;
    Ok(Enrichment { record, filled })
}
