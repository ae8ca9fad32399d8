//! SQL migration definitions for the rulevault database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: embedding_cache",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Vectors keyed by chunk content id and the model that produced them
CREATE TABLE IF NOT EXISTS embedding_cache (
    chunk_id    TEXT NOT NULL,
    model       TEXT NOT NULL,
    dimension   INTEGER NOT NULL,
    vector_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (chunk_id, model)
);

CREATE INDEX IF NOT EXISTS idx_embedding_cache_model ON embedding_cache(model);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Ingestion run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS ingest_runs (
    id           TEXT PRIMARY KEY,
    pdf_path     TEXT NOT NULL,
    game_system  TEXT NOT NULL,
    book_name    TEXT,
    version      TEXT,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    status       TEXT NOT NULL,
    failed_stage TEXT,
    report_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_ingest_runs_system ON ingest_runs(game_system);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
