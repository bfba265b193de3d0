use super::tag::{tag_map, tag_names};
use super::{validate_id, validate_tag_name, DatabaseError, Repository};
use crate::database::models::{NewStamp, StampFields, StampRecord, StampUpdate};
use crate::database::schema::STAMP_COLUMNS;
use crate::database::{format_timestamp, now, Database, FOLD_CASE_FN};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, ErrorCode, OptionalExtension, Row, ToSql};
use std::collections::HashSet;

pub struct StampRepository<'a> {
    db: &'a Database,
}

impl<'a> Repository<'a> for StampRepository<'a> {
    fn database(&self) -> &'a Database {
        self.db
    }
}

impl<'a> StampRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new stamp and return its id. A path that is already
    /// cataloged is a `Conflict`; the unique index is the backstop.
    pub fn insert(&self, stamp: &NewStamp) -> Result<i64, DatabaseError> {
        if stamp.image_path.trim().is_empty() {
            return Err(DatabaseError::Validation(
                "image path must not be empty".to_string(),
            ));
        }

        let timestamp = format_timestamp(&now());
        let fields = &stamp.fields;
        let result = self.connection().execute(
            "INSERT INTO stamps (image_path, fingerprint, name, country, denomination, year,
                description, notes, catalog_number, mint_or_used, collection, lot_number, price,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                stamp.image_path,
                stamp.fingerprint,
                fields.name,
                fields.country,
                fields.denomination,
                fields.year,
                fields.description,
                fields.notes,
                fields.catalog_number,
                fields.mint_or_used,
                fields.collection,
                fields.lot_number,
                fields.price,
                timestamp,
            ],
        );

        match result {
            Ok(_) => Ok(self.connection().last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(DatabaseError::Conflict {
                    image_path: stamp.image_path.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, id: i64) -> Result<StampRecord, DatabaseError> {
        validate_id(id)?;
        let sql = format!("SELECT {} FROM stamps WHERE id = ?1", STAMP_COLUMNS);
        let mut record = self
            .connection()
            .query_row(&sql, [id], stamp_from_row)
            .optional()?
            .ok_or(DatabaseError::NotFound { entity: "stamp", id })?;
        record.tags = tag_names(self.connection(), id)?;
        Ok(record)
    }

    pub fn find_by_path(&self, image_path: &str) -> Result<Option<StampRecord>, DatabaseError> {
        let sql = format!("SELECT {} FROM stamps WHERE image_path = ?1", STAMP_COLUMNS);
        let record = self
            .connection()
            .query_row(&sql, [image_path], stamp_from_row)
            .optional()?;

        match record {
            Some(mut record) => {
                record.tags = tag_names(self.connection(), record.id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every record, oldest first.
    pub fn list_all(&self) -> Result<Vec<StampRecord>, DatabaseError> {
        let sql = format!("SELECT {} FROM stamps ORDER BY id", STAMP_COLUMNS);
        self.query_records(&sql, &[])
    }

    /// Overwrite the fields present in `update`. `updated_at` always moves
    /// strictly forward; an empty update changes nothing.
    pub fn update(&self, id: i64, update: &StampUpdate) -> Result<StampRecord, DatabaseError> {
        let current = self.get(id)?;
        let assignments = update.assignments();
        if assignments.is_empty() {
            return Ok(current);
        }

        let updated_at = format_timestamp(&next_update_time(current.updated_at));

        let mut sql = String::from("UPDATE stamps SET ");
        for (i, (column, _)) in assignments.iter().enumerate() {
            sql.push_str(&format!("{} = ?{}, ", column, i + 1));
        }
        let n = assignments.len();
        sql.push_str(&format!("updated_at = ?{} WHERE id = ?{}", n + 1, n + 2));

        let mut values: Vec<&dyn ToSql> = assignments
            .iter()
            .map(|(_, value)| value as &dyn ToSql)
            .collect();
        values.push(&updated_at);
        values.push(&id);

        self.connection().execute(&sql, values.as_slice())?;
        self.get(id)
    }

    /// Delete a stamp. Its tag associations go with it.
    pub fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        validate_id(id)?;
        let deleted = self
            .connection()
            .execute("DELETE FROM stamps WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound { entity: "stamp", id });
        }
        Ok(())
    }

    /// Records whose country or description contains `query`
    /// (case-insensitive), restricted to records carrying at least one of
    /// `tags` when any are given.
    pub fn search(&self, query: &str, tags: &[String]) -> Result<Vec<StampRecord>, DatabaseError> {
        let tag_filter = tags
            .iter()
            .map(|name| validate_tag_name(name))
            .collect::<Result<Vec<_>, _>>()?;

        let query = query.trim();
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        let mut sql = format!(
            "SELECT {columns} FROM stamps
             WHERE (?1 = ''
                    OR {fold}(country) LIKE ?2 ESCAPE '\\'
                    OR {fold}(description) LIKE ?2 ESCAPE '\\')",
            columns = STAMP_COLUMNS,
            fold = FOLD_CASE_FN,
        );
        if !tag_filter.is_empty() {
            let placeholders = (0..tag_filter.len())
                .map(|i| format!("?{}", i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM stamp_tags st JOIN tags t ON t.id = st.tag_id
                   WHERE st.stamp_id = stamps.id AND t.name IN ({}))",
                placeholders
            ));
        }
        sql.push_str(" ORDER BY id");

        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(tag_filter.len() + 2);
        values.push(&query);
        values.push(&pattern);
        for name in &tag_filter {
            values.push(name);
        }

        self.query_records(&sql, &values)
    }

    pub fn all_image_paths(&self) -> Result<HashSet<String>, DatabaseError> {
        let mut stmt = self.connection().prepare("SELECT image_path FROM stamps")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(paths)
    }

    /// `(id, fingerprint)` for every record that has one.
    pub fn fingerprints(&self) -> Result<Vec<(i64, String)>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT id, fingerprint FROM stamps WHERE fingerprint IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_thumbnail_path(&self, id: i64, thumbnail_path: &str) -> Result<(), DatabaseError> {
        validate_id(id)?;
        let changed = self.connection().execute(
            "UPDATE stamps SET thumbnail_path = ?1 WHERE id = ?2",
            params![thumbnail_path, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound { entity: "stamp", id });
        }
        Ok(())
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        let count = self
            .connection()
            .query_row("SELECT COUNT(*) FROM stamps", [], |row| row.get(0))?;
        Ok(count)
    }

    fn query_records(
        &self,
        sql: &str,
        values: &[&dyn ToSql],
    ) -> Result<Vec<StampRecord>, DatabaseError> {
        let mut stmt = self.connection().prepare(sql)?;
        let mut records = stmt
            .query_map(values, stamp_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tags = tag_map(self.connection())?;
        for record in &mut records {
            record.tags = tags.remove(&record.id).unwrap_or_default();
        }
        Ok(records)
    }
}

pub(crate) fn stamp_exists(conn: &rusqlite::Connection, id: i64) -> Result<bool, DatabaseError> {
    let exists = conn
        .query_row("SELECT 1 FROM stamps WHERE id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some();
    Ok(exists)
}

fn stamp_from_row(row: &Row<'_>) -> rusqlite::Result<StampRecord> {
    Ok(StampRecord {
        id: row.get(0)?,
        image_path: row.get(1)?,
        fingerprint: row.get(2)?,
        thumbnail_path: row.get(3)?,
        fields: StampFields {
            name: row.get(4)?,
            country: row.get(5)?,
            denomination: row.get(6)?,
            year: row.get(7)?,
            description: row.get(8)?,
            notes: row.get(9)?,
            catalog_number: row.get(10)?,
            mint_or_used: row.get(11)?,
            collection: row.get(12)?,
            lot_number: row.get(13)?,
            price: row.get(14)?,
        },
        tags: Vec::new(),
        created_at: timestamp_at(row, 15)?,
        updated_at: timestamp_at(row, 16)?,
    })
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn next_update_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = now();
    if candidate > previous {
        candidate
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Escape LIKE metacharacters so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
