pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stamps (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    image_path      TEXT NOT NULL UNIQUE,
    fingerprint     TEXT,
    thumbnail_path  TEXT,
    name            TEXT NOT NULL DEFAULT '',
    country         TEXT NOT NULL DEFAULT '',
    denomination    TEXT NOT NULL DEFAULT '',
    year            TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    notes           TEXT NOT NULL DEFAULT '',
    catalog_number  TEXT NOT NULL DEFAULT '',
    mint_or_used    TEXT NOT NULL DEFAULT '',
    collection      TEXT NOT NULL DEFAULT '',
    lot_number      TEXT NOT NULL DEFAULT '',
    price           TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stamps_fingerprint ON stamps(fingerprint);

CREATE TABLE IF NOT EXISTS tags (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS stamp_tags (
    stamp_id    INTEGER NOT NULL REFERENCES stamps(id) ON DELETE CASCADE,
    tag_id      INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (stamp_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_stamp_tags_tag_id ON stamp_tags(tag_id);
"#;

/// Column order shared by every query that builds a `StampRecord`.
pub const STAMP_COLUMNS: &str = "id, image_path, fingerprint, thumbnail_path, name, country, \
     denomination, year, description, notes, catalog_number, mint_or_used, collection, \
     lot_number, price, created_at, updated_at";
