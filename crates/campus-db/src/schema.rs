//! SQL schema definitions for the app database.

/// Initial app database schema.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Site registry
-- ============================================================

CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    site_url TEXT NOT NULL,
    token TEXT NOT NULL DEFAULT '',
    private_token TEXT NOT NULL DEFAULT '',
    info TEXT,
    config TEXT,
    logged_out INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sites_url ON sites(site_url);

-- ============================================================
-- Current site pointer (at most one row)
-- ============================================================

CREATE TABLE IF NOT EXISTS current_site (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    site_id TEXT NOT NULL
);
"#;

/// V2: sites authenticated through an OAuth provider remember which one.
pub const MIGRATION_V2: &str = r#"
ALTER TABLE sites ADD COLUMN oauth_id INTEGER;
"#;

/// Per-site table recording the installed version of every site schema.
pub const SCHEMA_VERSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_versions (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL
);
"#;
