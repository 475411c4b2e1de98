pub const SCHEMA: &str = r#"
-- local fallback entries: one JSON array per key
CREATE TABLE IF NOT EXISTS local_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
