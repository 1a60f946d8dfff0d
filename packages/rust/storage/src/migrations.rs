//! SQL migration definitions for the canonical store database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: entity collections, index tables, artifacts, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical entity collections: one JSON document per entity
CREATE TABLE IF NOT EXISTS works (
    id           TEXT PRIMARY KEY,
    doc          TEXT NOT NULL,
    author_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS persons (
    id  TEXT PRIMARY KEY,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS affiliations (
    id  TEXT PRIMARY KEY,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sources (
    id  TEXT PRIMARY KEY,
    doc TEXT NOT NULL
);

-- Strong-key lookup: external identifier -> entity
CREATE TABLE IF NOT EXISTS external_id_index (
    kind      TEXT NOT NULL,
    source    TEXT NOT NULL,
    ext_id    TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    UNIQUE(kind, source, ext_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_ext_id ON external_id_index(kind, ext_id);

-- Exact normalized-name lookup
CREATE TABLE IF NOT EXISTS name_index (
    kind      TEXT NOT NULL,
    name_norm TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    UNIQUE(kind, name_norm, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_name_norm ON name_index(kind, name_norm);

-- Resolved author/affiliation ids per work, for network scans
-- Empty string (not NULL) marks the absent column so the UNIQUE
-- constraint deduplicates re-indexed rows.
CREATE TABLE IF NOT EXISTS work_participants (
    work_id        TEXT NOT NULL,
    person_id      TEXT NOT NULL DEFAULT '',
    affiliation_id TEXT NOT NULL DEFAULT '',
    UNIQUE(work_id, person_id, affiliation_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_person ON work_participants(person_id);
CREATE INDEX IF NOT EXISTS idx_participants_affiliation ON work_participants(affiliation_id);
CREATE INDEX IF NOT EXISTS idx_participants_work ON work_participants(work_id);

-- Derived artifacts (presence is the completion marker)
CREATE TABLE IF NOT EXISTS networks (
    id   TEXT NOT NULL,
    kind TEXT NOT NULL,
    doc  TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);

CREATE TABLE IF NOT EXISTS top_words (
    id   TEXT NOT NULL,
    kind TEXT NOT NULL,
    doc  TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);

-- Free-text search over display names and titles
CREATE VIRTUAL TABLE IF NOT EXISTS name_fts USING fts5(
    kind,
    entity_id UNINDEXED,
    name
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
