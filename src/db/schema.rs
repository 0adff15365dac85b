pub const SCHEMA: &str = r#"
-- comics table: one row per comic number. A row with NULL metadata is a
-- placeholder created when the number is first referenced; metadata is
-- filled in once by the first successful fetch.
CREATE TABLE IF NOT EXISTS comics (
    number INTEGER PRIMARY KEY CHECK (number >= 1),
    name TEXT,
    title_text TEXT,
    transcript TEXT,
    explanation TEXT,
    image_url TEXT,
    downloaded INTEGER NOT NULL DEFAULT 0,
    loading INTEGER NOT NULL DEFAULT 0,
    fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_comics_downloaded ON comics(downloaded);
CREATE INDEX IF NOT EXISTS idx_comics_loading ON comics(loading);
"#;
