use super::stamp::stamp_exists;
use super::{validate_id, validate_tag_name, DatabaseError, Repository};
use crate::database::models::Tag;
use crate::database::Database;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub struct TagRepository<'a> {
    db: &'a Database,
}

impl<'a> Repository<'a> for TagRepository<'a> {
    fn database(&self) -> &'a Database {
        self.db
    }
}

impl<'a> TagRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Attach `name` to a stamp, creating the tag on first use. Attaching a
    /// tag the stamp already has is a no-op.
    pub fn add_tag(&self, stamp_id: i64, name: &str) -> Result<(), DatabaseError> {
        validate_id(stamp_id)?;
        let name = validate_tag_name(name)?;
        self.ensure_stamp(stamp_id)?;

        let tx = self.connection().unchecked_transaction()?;
        tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", [name])?;
        let tag_id: i64 = tx.query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
        tx.execute(
            "INSERT OR IGNORE INTO stamp_tags (stamp_id, tag_id) VALUES (?1, ?2)",
            params![stamp_id, tag_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Detach `name` from a stamp. Returns whether the stamp had it.
    pub fn remove_tag(&self, stamp_id: i64, name: &str) -> Result<bool, DatabaseError> {
        validate_id(stamp_id)?;
        let name = validate_tag_name(name)?;
        self.ensure_stamp(stamp_id)?;

        let removed = self.connection().execute(
            "DELETE FROM stamp_tags
             WHERE stamp_id = ?1 AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            params![stamp_id, name],
        )?;
        Ok(removed > 0)
    }

    pub fn tags_for(&self, stamp_id: i64) -> Result<Vec<String>, DatabaseError> {
        validate_id(stamp_id)?;
        self.ensure_stamp(stamp_id)?;
        tag_names(self.connection(), stamp_id)
    }

    /// Every known tag with the number of stamps carrying it.
    pub fn list_tags(&self) -> Result<Vec<Tag>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT t.id, t.name, COUNT(st.stamp_id)
             FROM tags t LEFT JOIN stamp_tags st ON st.tag_id = t.id
             GROUP BY t.id, t.name
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    stamp_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn ensure_stamp(&self, stamp_id: i64) -> Result<(), DatabaseError> {
        if !stamp_exists(self.connection(), stamp_id)? {
            return Err(DatabaseError::NotFound {
                entity: "stamp",
                id: stamp_id,
            });
        }
        Ok(())
    }
}

pub(crate) fn tag_names(conn: &Connection, stamp_id: i64) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM stamp_tags st JOIN tags t ON t.id = st.tag_id
         WHERE st.stamp_id = ?1 ORDER BY t.name",
    )?;
    let names = stmt
        .query_map([stamp_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Tag names per stamp id, each list sorted.
pub(crate) fn tag_map(conn: &Connection) -> Result<HashMap<i64, Vec<String>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT st.stamp_id, t.name FROM stamp_tags st JOIN tags t ON t.id = st.tag_id
         ORDER BY t.name",
    )?;
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (stamp_id, name) = row?;
        map.entry(stamp_id).or_default().push(name);
    }
    Ok(map)
}
